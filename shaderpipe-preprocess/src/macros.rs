use shaderpipe_common::map::FastHashMap;

/// One node of the nested-conditional tree.
///
/// `defined` is the AND of this branch's own condition and all of its
/// ancestors'. `any_child_defined` flips once a sibling has matched,
/// which is what makes later `#elif`/`#else` siblings automatically
/// false. Children are referenced by arena index; the root is always
/// defined.
#[derive(Debug)]
struct Branch {
    defined: bool,
    any_child_defined: bool,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Define table plus the `#if`/`#ifdef`/`#elif`/`#else`/`#endif` state
/// machine. Scoped to one stage's compilation pass; cleared between
/// stages.
#[derive(Debug)]
pub struct MacroTree {
    defines: FastHashMap<String, String>,
    arena: Vec<Branch>,
}

#[derive(Copy, Clone)]
enum LogicalOp {
    And,
    Or,
}

#[derive(Copy, Clone)]
enum CmpOp {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

pub(crate) fn is_number(s: &str) -> bool {
    !s.is_empty() && s.parse::<f32>().is_ok()
}

impl Default for MacroTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroTree {
    pub fn new() -> Self {
        MacroTree {
            defines: FastHashMap::default(),
            arena: vec![Branch {
                defined: true,
                any_child_defined: false,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn clear(&mut self) {
        self.defines.clear();
        self.arena.truncate(1);
        self.arena[0].children.clear();
        self.arena[0].any_child_defined = false;
    }

    /// Whether `name` is bound in the define table.
    pub fn is_bound(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    /// Macro expansion of a single term: numeric literals are returned
    /// unchanged, bound names expand to their replacement, and unbound
    /// names expand to themselves.
    pub fn expand<'a>(&'a self, term: &'a str) -> &'a str {
        if is_number(term) {
            return term;
        }
        self.defines.get(term).map_or(term, String::as_str)
    }

    /// `#define NAME [VALUE]`. A name without replacement binds to `"1"`.
    /// No-op while the active branch is false.
    pub fn define(&mut self, body: &str) {
        if !self.is_active() {
            return;
        }
        match body.split_once(' ') {
            None => {
                self.defines.insert(body.to_string(), "1".to_string());
            }
            Some((name, value)) => {
                self.defines.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// `#undef NAME`.
    pub fn undef(&mut self, name: &str) {
        self.defines.remove(name);
    }

    /// `#if`/`#ifdef`: opens a child branch under the deepest open one.
    pub fn open_if(&mut self, expression: &str) {
        let condition = self.evaluate(expression);
        self.open(condition);
    }

    /// `#ifndef`.
    pub fn open_ifndef(&mut self, expression: &str) {
        let condition = !self.evaluate(expression);
        self.open(condition);
    }

    /// `#elif`: inserts a sibling under the active branch's parent.
    pub fn add_elif(&mut self, expression: &str) {
        let condition = self.evaluate(expression);
        self.add(condition);
    }

    /// `#else` is an `#elif` whose condition is unconditionally true.
    pub fn add_else(&mut self) {
        self.add(true);
    }

    /// `#endif`: pops one nesting level.
    pub fn close_endif(&mut self) {
        self.close();
    }

    /// Whether the active (most recently opened) branch is true. All raw
    /// output lines are gated on this.
    pub fn is_active(&self) -> bool {
        self.arena[self.active()].defined
    }

    /// Processing always descends to the most recently opened leaf.
    fn active(&self) -> usize {
        let mut index = 0;
        while let Some(&last) = self.arena[index].children.last() {
            index = last;
        }
        index
    }

    fn open(&mut self, condition: bool) {
        let active = self.active();
        let defined = condition && self.arena[active].defined;
        if condition {
            self.arena[active].any_child_defined = true;
        }
        let child = self.arena.len();
        self.arena.push(Branch {
            defined,
            any_child_defined: false,
            parent: Some(active),
            children: Vec::new(),
        });
        self.arena[active].children.push(child);
    }

    fn add(&mut self, condition: bool) {
        let active = self.active();
        let Some(parent) = self.arena[active].parent else {
            // stray #elif/#else outside any #if
            return;
        };
        let defined = if self.arena[parent].any_child_defined {
            false
        } else {
            condition && self.arena[parent].defined
        };
        if condition {
            self.arena[parent].any_child_defined = true;
        }
        let sibling = self.arena.len();
        self.arena.push(Branch {
            defined,
            any_child_defined: false,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.arena[parent].children.push(sibling);
    }

    fn close(&mut self) {
        let active = self.active();
        let Some(parent) = self.arena[active].parent else {
            return;
        };
        // orphaned nodes stay in the arena until clear()
        self.arena[parent].children.clear();
        self.arena[parent].any_child_defined = false;
    }

    /// Evaluates a conditional expression with two precedence levels:
    /// `&&`/`||` at the top (a leading parenthesized group is recognized
    /// specially), comparisons below.
    pub fn evaluate(&self, expression: &str) -> bool {
        if let Some((lhs, op, rhs)) = split_leading_group(expression) {
            return match op {
                LogicalOp::And => self.evaluate(lhs) && self.evaluate(rhs),
                LogicalOp::Or => self.evaluate(lhs) || self.evaluate(rhs),
            };
        }
        if let Some((lhs, op, rhs)) = split_logical(expression) {
            return match op {
                LogicalOp::And => self.evaluate_inner(lhs) && self.evaluate(rhs),
                LogicalOp::Or => self.evaluate_inner(lhs) || self.evaluate(rhs),
            };
        }
        self.evaluate_inner(expression)
    }

    /// Comparison level. Equality compares macro-expanded strings;
    /// ordering requires both operands to parse as numbers and is false
    /// otherwise. A bare term is true iff it is a nonzero number or a
    /// macro bound to anything other than `"0"`.
    fn evaluate_inner(&self, expression: &str) -> bool {
        if let Some((lhs, op, rhs)) = split_comparison(expression) {
            let lhs = self.expand(lhs.trim());
            let rhs = self.expand(rhs.trim());
            match op {
                CmpOp::Eq => return lhs == rhs,
                CmpOp::Ne => return lhs != rhs,
                _ => {}
            }
            let (Ok(a), Ok(b)) = (lhs.parse::<f32>(), rhs.parse::<f32>()) else {
                return false;
            };
            return match op {
                CmpOp::Le => a <= b,
                CmpOp::Ge => a >= b,
                CmpOp::Lt => a < b,
                CmpOp::Gt => a > b,
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            };
        }

        let term = expression.trim();
        if is_number(term) {
            return term != "0";
        }
        match self.defines.get(term) {
            None => false,
            Some(value) => value != "0",
        }
    }
}

/// `( group ) op rhs` where rhs contains no closing parenthesis.
fn split_leading_group(s: &str) -> Option<(&str, LogicalOp, &str)> {
    let t = s.trim_start();
    if !t.starts_with('(') {
        return None;
    }
    for (i, _) in t.rmatch_indices(')') {
        let after = t[i + 1..].trim_start();
        let (op, rhs) = if let Some(rhs) = after.strip_prefix("&&") {
            (LogicalOp::And, rhs)
        } else if let Some(rhs) = after.strip_prefix("||") {
            (LogicalOp::Or, rhs)
        } else {
            continue;
        };
        if rhs.contains(')') {
            continue;
        }
        return Some((&t[1..i], op, rhs));
    }
    None
}

/// Splits on the first top-level `&&`/`||`.
fn split_logical(s: &str) -> Option<(&str, LogicalOp, &str)> {
    let and = s.find("&&");
    let or = s.find("||");
    let (index, op) = match (and, or) {
        (Some(a), Some(o)) if a < o => (a, LogicalOp::And),
        (Some(a), None) => (a, LogicalOp::And),
        (_, Some(o)) => (o, LogicalOp::Or),
        (None, None) => return None,
    };
    Some((&s[..index], op, &s[index + 2..]))
}

/// Finds the last comparison operator with nonempty operands on both
/// sides, preferring the two-character operators at a given position.
fn split_comparison(s: &str) -> Option<(&str, CmpOp, &str)> {
    let bytes = s.as_bytes();
    let mut found: Vec<(usize, CmpOp, usize)> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let (op, len) = match s.get(i..i + 2) {
            Some("==") => (CmpOp::Eq, 2),
            Some("!=") => (CmpOp::Ne, 2),
            Some("<=") => (CmpOp::Le, 2),
            Some(">=") => (CmpOp::Ge, 2),
            _ => match bytes[i] {
                b'<' => (CmpOp::Lt, 1),
                b'>' => (CmpOp::Gt, 1),
                _ => {
                    i += 1;
                    continue;
                }
            },
        };
        found.push((i, op, len));
        i += len;
    }
    found
        .into_iter()
        .rev()
        .find(|&(index, _, len)| index > 0 && index + len < s.len())
        .map(|(index, op, len)| (&s[..index], op, &s[index + len..]))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numeric_ordering_uses_float_parse() {
        let tree = MacroTree::new();
        assert!(tree.evaluate("10 > 2"));
        assert!(tree.evaluate("2.5 >= 2"));
        assert!(tree.evaluate("2.5 > 2"));
        assert!(!tree.evaluate("1 > 2"));
        assert!(!tree.evaluate("foo > 2"));
    }

    #[test]
    fn equality_compares_expanded_strings() {
        let mut tree = MacroTree::new();
        tree.define("MODE fancy");
        assert!(tree.evaluate("MODE == fancy"));
        assert!(tree.evaluate("MODE != plain"));
        assert!(!tree.evaluate("MODE == plain"));
    }

    #[test]
    fn bare_terms() {
        let mut tree = MacroTree::new();
        assert!(tree.evaluate("1"));
        assert!(!tree.evaluate("0"));
        assert!(!tree.evaluate("UNBOUND"));
        tree.define("FLAG");
        assert!(tree.evaluate("FLAG"));
        tree.define("FLAG 0");
        assert!(!tree.evaluate("FLAG"));
    }

    #[test]
    fn logical_operators_and_leading_group() {
        let mut tree = MacroTree::new();
        tree.define("A 1");
        tree.define("B 0");
        assert!(tree.evaluate("A || B"));
        assert!(!tree.evaluate("A && B"));
        assert!(tree.evaluate("(A || B) && A"));
        assert!(!tree.evaluate("(A && B) || B"));
    }

    #[test]
    fn ordering_on_macro_expanded_values() {
        let mut tree = MacroTree::new();
        tree.define("COUNT 2.5");
        assert!(tree.evaluate("COUNT > 2"));
        tree.define("COUNT vec3(1)");
        assert!(!tree.evaluate("COUNT > 2"));
    }

    #[test]
    fn first_true_branch_wins() {
        let mut tree = MacroTree::new();
        tree.open_if("0");
        assert!(!tree.is_active());
        tree.add_elif("1");
        assert!(tree.is_active());
        tree.add_elif("1");
        assert!(!tree.is_active());
        tree.add_else();
        assert!(!tree.is_active());
        tree.close_endif();
        assert!(tree.is_active());
    }

    #[test]
    fn nested_branches_and_ancestor_gating() {
        let mut tree = MacroTree::new();
        tree.open_if("0");
        tree.open_if("1");
        // a true condition under a false parent stays false
        assert!(!tree.is_active());
        tree.close_endif();
        assert!(!tree.is_active());
        tree.add_else();
        assert!(tree.is_active());
        tree.open_if("1");
        assert!(tree.is_active());
        tree.close_endif();
        tree.close_endif();
        assert!(tree.is_active());
    }

    #[test]
    fn defines_do_not_mutate_in_false_branches() {
        let mut tree = MacroTree::new();
        tree.open_if("0");
        tree.define("HIDDEN 1");
        assert!(!tree.is_bound("HIDDEN"));
        tree.close_endif();
        tree.define("VISIBLE 1");
        assert!(tree.is_bound("VISIBLE"));
    }

    #[test]
    fn clear_resets_defines_and_nesting() {
        let mut tree = MacroTree::new();
        tree.define("A 1");
        tree.open_if("0");
        assert!(!tree.is_active());
        tree.clear();
        assert!(tree.is_active());
        assert!(!tree.is_bound("A"));
    }

    #[test]
    fn all_digit_identifier_compares_numerically() {
        let tree = MacroTree::new();
        // never #define'd, still numeric
        assert!(tree.evaluate("42 >= 7"));
    }
}
