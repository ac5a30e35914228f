//! Total order over resource states.
//!
//! Both sides sort the declared list with this comparator before diffing, so
//! re-declaring the same set of states in a different array order produces no
//! wire traffic and the mirror's rendering never flickers. The primary key is
//! the source location path, compared case-insensitively one path segment at
//! a time; ties fall through to the attached command and then the
//! decorations.

use std::cmp::Ordering;

use url::Url;

use super::{CommandDescriptor, Decorations, ResourceState};

pub fn compare_resource_states(a: &ResourceState, b: &ResourceState) -> Ordering {
    compare_locations(&a.uri, &b.uri)
        .then_with(|| compare_commands(a.command.as_ref(), b.command.as_ref()))
        .then_with(|| compare_decorations(&a.decorations, &b.decorations))
}

/// Path-segment-aware, case-insensitive comparison. A raw string compare
/// would order `foo-bar/x` before `foo/x`; segment-wise comparison keeps
/// directory trees contiguous.
pub fn compare_locations(a: &Url, b: &Url) -> Ordering {
    let mut left = a.path().split('/').filter(|s| !s.is_empty());
    let mut right = b.path().split('/').filter(|s| !s.is_empty());
    loop {
        match (left.next(), right.next()) {
            (Some(l), Some(r)) => {
                let ordering = compare_ignore_case(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            // Same path; keep distinct schemes/authorities deterministic.
            (None, None) => return a.as_str().cmp(b.as_str()),
        }
    }
}

fn compare_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

fn compare_commands(a: Option<&CommandDescriptor>, b: Option<&CommandDescriptor>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a
            .id
            .cmp(&b.id)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.tooltip.cmp(&b.tooltip))
            .then_with(|| compare_arguments(&a.arguments, &b.arguments)),
    }
}

fn compare_arguments(a: &[serde_json::Value], b: &[serde_json::Value]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| {
        for (left, right) in a.iter().zip(b.iter()) {
            if left != right {
                // Positional inequality; fall back to the serialized form for
                // a deterministic direction.
                return left.to_string().cmp(&right.to_string());
            }
        }
        Ordering::Equal
    })
}

fn compare_decorations(a: &Decorations, b: &Decorations) -> Ordering {
    // Struck-through and faded entries sort first.
    flag_first(a.strike_through, b.strike_through)
        .then_with(|| flag_first(a.faded, b.faded))
        .then_with(|| a.tooltip.cmp(&b.tooltip))
        .then_with(|| compare_icon(a.icon_light.as_ref(), b.icon_light.as_ref()))
        .then_with(|| compare_icon(a.icon_dark.as_ref(), b.icon_dark.as_ref()))
}

fn flag_first(a: bool, b: bool) -> Ordering {
    b.cmp(&a)
}

fn compare_icon(a: Option<&Url>, b: Option<&Url>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.as_str().cmp(b.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(uri: &str) -> ResourceState {
        ResourceState::new(Url::parse(uri).unwrap())
    }

    #[test]
    fn segments_beat_raw_string_order() {
        let a = state("file:///src-extra/x.txt");
        let b = state("file:///src/x.txt");
        // '/' terminates the first segment before '-' would in a raw compare
        assert_eq!(compare_resource_states(&b, &a), Ordering::Less);
    }

    #[test]
    fn path_compare_is_case_insensitive() {
        let a = state("file:///Src/A.txt");
        let b = state("file:///src/b.txt");
        assert_eq!(compare_resource_states(&a, &b), Ordering::Less);
    }

    #[test]
    fn shorter_path_sorts_first() {
        let a = state("file:///src");
        let b = state("file:///src/x.txt");
        assert_eq!(compare_resource_states(&a, &b), Ordering::Less);
    }

    #[test]
    fn command_breaks_uri_tie() {
        let mut a = state("file:///a.txt");
        let mut b = state("file:///a.txt");
        a.command = Some(CommandDescriptor::new("editor.diff", "Diff"));
        b.command = Some(CommandDescriptor::new("editor.open", "Open"));
        assert_eq!(compare_resource_states(&a, &b), Ordering::Less);
    }

    #[test]
    fn strike_through_sorts_before_plain() {
        let mut a = state("file:///a.txt");
        let b = state("file:///a.txt");
        a.decorations.strike_through = true;
        assert_eq!(compare_resource_states(&a, &b), Ordering::Less);
    }

    #[test]
    fn case_only_difference_stays_deterministic() {
        let a = state("file:///Src/a.txt");
        let b = state("file:///src/a.txt");
        // Equal under folding; the full-string tie-break keeps a stable order.
        assert_eq!(compare_resource_states(&a, &b), Ordering::Less);
        assert_eq!(compare_resource_states(&b, &a), Ordering::Greater);
    }

    #[test]
    fn identical_states_are_equal() {
        let mut a = state("file:///a.txt");
        a.command = Some(CommandDescriptor::new("editor.open", "Open"));
        let b = a.clone();
        assert_eq!(compare_resource_states(&a, &b), Ordering::Equal);
    }
}
