//! Breakpoint Table (component C): an ordered set of breakpoint
//! descriptors with path normalization, hit-count bookkeeping, and
//! path-equivalence lookup. Holds no VM reference — condition and
//! hit-condition expressions are evaluated by the Execution Controller via
//! the Frame Inspector, not here.

use std::path::{Path, PathBuf};

pub type BreakpointId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointDescriptor {
    pub id: BreakpointId,
    pub file: String,
    pub func: Option<String>,
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub hit_count: u64,
    pub enabled: bool,
}

const HIT_CONDITION_PREFIXES: [&str; 6] = ["<=", ">=", "==", "<", ">", "%"];

/// If `hit_condition` doesn't already start with a recognized relational
/// operator, `>=` is assumed (so a bare `"3"` means "stop on the 3rd hit and
/// every hit after").
fn normalize_hit_condition(raw: Option<String>) -> Option<String> {
    raw.map(|s| {
        if HIT_CONDITION_PREFIXES.iter().any(|p| s.starts_with(p)) {
            s
        } else {
            format!(">={s}")
        }
    })
}

/// Joins `file` onto `working_dir` if it's relative and a working directory
/// is configured; otherwise returned unchanged.
fn normalize_file(file: &str, working_dir: Option<&Path>) -> String {
    let path = Path::new(file);
    match working_dir {
        Some(base) if path.is_relative() => base.join(path).to_string_lossy().into_owned(),
        _ => file.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct BreakpointTable {
    next_id: BreakpointId,
    entries: Vec<BreakpointDescriptor>,
    pub working_dir: Option<PathBuf>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        file: &str,
        line: u32,
        condition: Option<String>,
        hit_condition: Option<String>,
    ) -> BreakpointId {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(BreakpointDescriptor {
            id,
            file: normalize_file(file, self.working_dir.as_deref()),
            func: None,
            line,
            condition,
            hit_condition: normalize_hit_condition(hit_condition),
            hit_count: 0,
            enabled: true,
        });
        id
    }

    pub fn list_all(&self) -> &[BreakpointDescriptor] {
        &self.entries
    }

    /// Clears by file, by file+line, or everything when both are `None`.
    pub fn clear(&mut self, file: Option<&str>, line: Option<u32>) {
        match (file, line) {
            (None, _) => self.entries.clear(),
            (Some(f), None) => self.entries.retain(|bp| !path_equivalent(&bp.file, f)),
            (Some(f), Some(l)) => {
                self.entries.retain(|bp| !(path_equivalent(&bp.file, f) && bp.line == l));
            },
        }
    }

    /// Finds the first descriptor (in insertion order) whose `(file, line)`
    /// matches the VM-reported source. `vm_source_path` carries the VM's
    /// leading `@` sigil for file-loaded chunks; a chunk with no `@` is
    /// ineligible to carry breakpoints.
    pub fn find_index(&self, vm_source_path: &str, line: u32) -> Option<usize> {
        let stripped = vm_source_path.strip_prefix('@')?;
        let absolutized = normalize_file(stripped, self.working_dir.as_deref());
        self.entries
            .iter()
            .position(|bp| bp.enabled && bp.line == line && path_equivalent(&bp.file, &absolutized))
    }

    pub fn get(&self, index: usize) -> Option<&BreakpointDescriptor> {
        self.entries.get(index)
    }

    pub fn record_hit(&mut self, index: usize) -> u64 {
        let bp = &mut self.entries[index];
        bp.hit_count += 1;
        bp.hit_count
    }
}

/// Byte-exact comparison after skipping leading `./` segments on either side
/// and treating `\` and `/` as equivalent separators. Both inputs must
/// terminate at the same time — `a/b` does not match `a/b/c`.
pub fn path_equivalent(a: &str, b: &str) -> bool {
    let mut ta = tokenize_path(a);
    let mut tb = tokenize_path(b);
    loop {
        match (ta.next(), tb.next()) {
            (Some(x), Some(y)) if x == y => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn tokenize_path(p: &str) -> impl Iterator<Item = &str> {
    p.split(['/', '\\']).filter(|seg| *seg != "." && !seg.is_empty())
}

/// `<hit_count><hit_condition>` rendered as the expression string the
/// Execution Controller hands to the Frame Inspector's `eval`.
pub fn hit_condition_expr(hit_count: u64, hit_condition: &str) -> String {
    format!("{hit_count}{hit_condition}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn insertion_order_is_preserved_for_duplicate_file_line() {
        let mut table = BreakpointTable::new();
        let first = table.insert("a.lua", 5, None, None);
        let second = table.insert("a.lua", 5, None, None);
        assert!(first < second);
        assert_eq!(table.list_all().len(), 2);
    }

    #[test]
    fn hit_condition_defaults_to_gte() {
        let mut table = BreakpointTable::new();
        table.insert("a.lua", 1, None, Some("7".into()));
        assert_eq!(table.list_all()[0].hit_condition.as_deref(), Some(">=7"));
        table.insert("a.lua", 2, None, Some("<7".into()));
        assert_eq!(table.list_all()[1].hit_condition.as_deref(), Some("<7"));
    }

    #[test]
    fn path_equivalence_matches_separator_and_dot_variants() {
        assert!(path_equivalent("a/b/c.lua", "./a/b/c.lua"));
        assert!(path_equivalent("a/b/c.lua", "a\\b\\c.lua"));
        assert!(!path_equivalent("a/b/c.lua", "a/b/c/d.lua"));
        assert!(!path_equivalent("a/b.lua", "x/b.lua"));
    }

    #[test]
    fn find_index_strips_at_sigil_and_rejects_string_chunks() {
        let mut table = BreakpointTable::new();
        table.insert("test1.lua", 5, None, None);
        assert_eq!(table.find_index("@test1.lua", 5), Some(0));
        assert_eq!(table.find_index("test1.lua", 5), None, "no @ sigil => string chunk");
    }

    #[test]
    fn clear_by_file_and_line_variants() {
        let mut table = BreakpointTable::new();
        table.insert("a.lua", 1, None, None);
        table.insert("a.lua", 2, None, None);
        table.insert("b.lua", 1, None, None);

        table.clear(Some("a.lua"), Some(1));
        assert_eq!(table.list_all().len(), 2);

        table.clear(Some("a.lua"), None);
        assert_eq!(table.list_all().len(), 1);

        table.clear(None, None);
        assert_eq!(table.list_all().len(), 0);
    }

    #[test]
    fn hit_count_never_decrements() {
        let mut table = BreakpointTable::new();
        table.insert("a.lua", 1, None, None);
        for _ in 0..5 {
            table.record_hit(0);
        }
        assert_eq!(table.list_all()[0].hit_count, 5);
    }

    proptest::proptest! {
        /// Re-rendering a path through any mix of `/`/`\` separators and
        /// leading `./` segments must stay equivalent to the original.
        #[test]
        fn path_equivalence_survives_separator_and_dot_permutations(
            segments in proptest::collection::vec("[a-zA-Z0-9_]{1,6}", 1..5),
            use_backslash in proptest::bool::ANY,
            leading_dot_segments in 0usize..3,
        ) {
            let original = segments.join("/");
            let sep = if use_backslash { '\\' } else { '/' };
            let mut rendered = "./".repeat(leading_dot_segments);
            rendered.push_str(&segments.join(&sep.to_string()));
            prop_assert!(path_equivalent(&original, &rendered));
        }

        #[test]
        fn path_equivalence_rejects_different_segment_counts(
            segments in proptest::collection::vec("[a-zA-Z0-9_]{1,6}", 2..5),
        ) {
            let full = segments.join("/");
            let truncated = segments[..segments.len() - 1].join("/");
            prop_assert!(!path_equivalent(&full, &truncated));
        }
    }
}
