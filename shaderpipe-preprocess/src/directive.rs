use crate::macros::MacroTree;
use crate::stages::{LineProcessor, StageState};
use shaderpipe_common::Stage;

/// Upper bound on `${..}` re-expansion passes, so a self-referential
/// define cannot hang the pipeline.
const MAX_SUBSTITUTION_PASSES: usize = 32;

struct ForBranch {
    variable: String,
    bound: String,
    body: String,
}

/// Line filter implementing the directive language: `#define`/`#undef`,
/// `#include`, `#for`/`#endfor`, `#version` collection, conditional
/// compilation through a [`MacroTree`], and `${VAR}` substitution.
///
/// Nothing here is fatal; malformed directives degrade to an inline
/// `#warning`/`#error` so the pass always completes.
pub struct DirectiveProcessor {
    parent: Option<Box<dyn LineProcessor>>,
    tree: MacroTree,
    /// Nested sources opened by `#include` and `#endfor` expansion,
    /// consumed innermost first before the parent resumes.
    nested: Vec<std::vec::IntoIter<String>>,
    continued: String,
    for_stack: Vec<ForBranch>,
    was_empty: bool,
    last_stage: Option<Stage>,
}

impl Default for DirectiveProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectiveProcessor {
    pub fn new() -> Self {
        DirectiveProcessor {
            parent: None,
            tree: MacroTree::new(),
            nested: Vec::new(),
            continued: String::new(),
            for_stack: Vec::new(),
            was_empty: true,
            last_stage: None,
        }
    }

    fn push_source(&mut self, text: &str) {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        self.nested.push(lines.into_iter());
    }

    fn raw_line(&mut self, state: &mut StageState<'_>) -> Option<String> {
        loop {
            match self.nested.last_mut() {
                Some(source) => match source.next() {
                    Some(line) => return Some(line),
                    None => {
                        self.nested.pop();
                    }
                },
                None => return self.parent.as_mut()?.next_line(state),
            }
        }
    }

    fn expand_for(&mut self, branch: ForBranch) {
        let bound = self.tree.expand(&branch.bound).to_string();
        let text = match bound.parse::<i64>() {
            Ok(count) => {
                let mut text = String::new();
                for i in 0..count.max(0) {
                    text.push_str(&format!("#define2 {} {}\n", branch.variable, i));
                    text.push_str(&branch.body);
                }
                text
            }
            Err(_) => format!("#error {} is not a number\n", branch.bound),
        };
        self.push_source(&text);
    }
}

impl LineProcessor for DirectiveProcessor {
    fn name(&self) -> &'static str {
        "directive"
    }

    fn next_line(&mut self, state: &mut StageState<'_>) -> Option<String> {
        if self.last_stage != Some(state.stage) {
            self.last_stage = Some(state.stage);
            self.tree.clear();
            self.nested.clear();
            self.continued.clear();
            self.for_stack.clear();
            self.was_empty = true;
        }

        loop {
            let mut line = self.raw_line(state)?;

            if line.ends_with('\\') {
                self.continued.push_str(&line);
                self.continued.push('\n');
                continue;
            }
            if !self.continued.is_empty() {
                line = std::mem::take(&mut self.continued) + &line;
            }

            if self.tree.is_active() && self.for_stack.is_empty() {
                substitute_variables(&mut line, &self.tree);
            }

            let statement = line.trim().to_string();
            let is_empty = statement.is_empty();
            if is_empty && self.was_empty {
                continue;
            }
            self.was_empty = is_empty;

            if statement.starts_with("#line ") {
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#version ") {
                if let Ok(version) = rest.trim().parse::<u32>() {
                    if state.version < version {
                        state.version = version;
                    }
                }
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#for ") {
                match rest.rsplit_once(" to ") {
                    Some((variable, bound)) => self.for_stack.push(ForBranch {
                        variable: variable.trim().to_string(),
                        bound: bound.trim().to_string(),
                        body: String::new(),
                    }),
                    None => {
                        return Some(format!(
                            "#warning Invalid Syntax: '{statement}'. Example: '#for INDEX to 9'."
                        ))
                    }
                }
                continue;
            }
            if statement.starts_with("#endfor") {
                match self.for_stack.pop() {
                    Some(branch) => self.expand_for(branch),
                    None => {
                        return Some("#warning Closing #endfor without opening #for.".to_string())
                    }
                }
                continue;
            }
            if let Some(branch) = self.for_stack.last_mut() {
                branch.body.push_str(&line);
                branch.body.push('\n');
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#include ") {
                if !self.tree.is_active() {
                    continue;
                }
                let key = rest.trim();
                let imported = match state.input.extern_functions.get(key) {
                    Some(text) => text.clone(),
                    None => state.includer.include(key).to_string(),
                };
                if imported.is_empty() {
                    return Some(format!(
                        "#warning Failed to include {key}. Make sure the include path is set up."
                    ));
                }
                self.push_source(&imported);
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#define2 ") {
                // evaluation-only define, never forwarded to the compiler
                self.tree.define(rest.trim());
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#define ") {
                self.tree.define(rest.trim());
                if self.tree.is_active() {
                    return Some(line);
                }
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#undef ") {
                self.tree.undef(rest.trim());
                if self.tree.is_active() {
                    return Some(line);
                }
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#ifdef ") {
                self.tree.open_if(rest.trim());
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#ifndef ") {
                self.tree.open_ifndef(rest.trim());
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#if ") {
                self.tree.open_if(rest.trim());
                continue;
            }
            if let Some(rest) = statement.strip_prefix("#elif ") {
                self.tree.add_elif(rest.trim());
                continue;
            }
            if statement.starts_with("#else") {
                self.tree.add_else();
                continue;
            }
            if statement.starts_with("#endif") {
                self.tree.close_endif();
                continue;
            }
            if self.tree.is_active() {
                return Some(line);
            }
        }
    }

    fn reset(&mut self) {
        self.tree.clear();
        self.nested.clear();
        self.continued.clear();
        self.for_stack.clear();
        self.was_empty = true;
        self.last_stage = None;
    }

    fn set_parent(&mut self, parent: Option<Box<dyn LineProcessor>>) {
        self.parent = parent;
    }

    fn take_parent(&mut self) -> Option<Box<dyn LineProcessor>> {
        self.parent.take()
    }

    fn parent_mut(&mut self) -> Option<&mut Box<dyn LineProcessor>> {
        self.parent.as_mut()
    }
}

/// Replaces every bound `${NAME}` on the line, repeating until the line
/// is stable so nested `${..}` forms expand from the inside out.
/// Re-running on already-expanded output is a no-op.
pub(crate) fn substitute_variables(line: &mut String, tree: &MacroTree) {
    for _ in 0..MAX_SUBSTITUTION_PASSES {
        let mut out = String::with_capacity(line.len());
        let mut rest: &str = line;
        let mut replaced = false;
        while let Some((start, end, name)) = find_variable(rest) {
            if tree.is_bound(name) {
                out.push_str(&rest[..start]);
                out.push_str(tree.expand(name));
                replaced = true;
            } else {
                out.push_str(&rest[..end]);
            }
            rest = &rest[end..];
        }
        if !replaced {
            return;
        }
        out.push_str(rest);
        *line = out;
    }
}

/// Finds the next well-formed `${ NAME }` occurrence; the name may not
/// contain spaces or braces.
fn find_variable(s: &str) -> Option<(usize, usize, &str)> {
    let mut search = 0;
    while let Some(offset) = s[search..].find("${") {
        let start = search + offset;
        let inner_start = start + 2;
        if let Some(close) = s[inner_start..].find(['{', '}']) {
            if s.as_bytes()[inner_start + close] == b'}' {
                let name = s[inner_start..inner_start + close].trim_matches(' ');
                if !name.is_empty() && !name.contains(' ') {
                    return Some((start, inner_start + close + 1, name));
                }
            }
        }
        search = start + 2;
    }
    None
}
