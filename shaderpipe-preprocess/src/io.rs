use crate::declaration::{parse_declaration, ArraySize, Declaration, IoKind};
use crate::stages::{LineProcessor, SpecifiedInput, StageState};
use shaderpipe_common::map::FastHashMap;
use shaderpipe_common::{base_name, Stage};
use std::collections::{BTreeMap, VecDeque};

/// Per-stage directories of declarations already seen, keyed by base
/// name. Ordered maps keep synthesis output deterministic.
#[derive(Debug, Default)]
struct StageDirectories {
    inputs: BTreeMap<String, Declaration>,
    outputs: BTreeMap<String, Declaration>,
    uniforms: BTreeMap<String, Declaration>,
}

/// Line filter keeping `in_`/`out_` declarations consistent across
/// adjacent stages.
///
/// Declarations are authored with generic prefixes; on emission a
/// renaming `#define` plus the concrete stage-prefixed declaration is
/// produced, so the same source compiles under any stage. A bare
/// `#define HANDLE_IO` triggers synthesis of the pass-through
/// declarations and `HANDLE_IO()` function for whatever the next stage
/// consumes but this stage does not yet produce.
pub struct IoProcessor {
    parent: Option<Box<dyn LineProcessor>>,
    directories: FastHashMap<Stage, StageDirectories>,
    /// Synthesized lines drained before new input is read, so renaming
    /// defines always sit directly above their declaration.
    queue: VecDeque<String>,
    was_empty: bool,
}

impl Default for IoProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl IoProcessor {
    pub fn new() -> Self {
        IoProcessor {
            parent: None,
            directories: FastHashMap::default(),
            queue: VecDeque::new(),
            was_empty: true,
        }
    }

    /// Declared inputs of a stage, used by the preceding stage's
    /// synthesis step.
    fn stage_inputs(&self, stage: Stage) -> Vec<(String, Declaration)> {
        self.directories
            .get(&stage)
            .map(|dirs| {
                dirs.inputs
                    .iter()
                    .map(|(name, decl)| (name.clone(), decl.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Diffs the next stage's declared inputs against this stage's
    /// outputs and queues declarations plus a `HANDLE_IO` function
    /// covering everything missing.
    fn synthesize_handle_io(&mut self, state: &StageState<'_>) {
        let stage = state.stage;
        let next_inputs = match state.next_stage {
            Some(next) => self.stage_inputs(next),
            None => Vec::new(),
        };

        let mut generated_out = Vec::new();
        let mut generated_in = Vec::new();
        let mut pass_through = Vec::new();
        {
            let dirs = self.directories.entry(stage).or_default();
            for (base, next_in) in next_inputs {
                if dirs.outputs.contains_key(&base) {
                    continue;
                }
                let mut out_decl = next_in.clone();
                out_decl.kind = IoKind::Out;
                out_decl.name = format!("out_{base}");
                out_decl.initializer = None;
                out_decl.array_size = match stage {
                    Stage::TessControl => Some(ArraySize::Unsized),
                    _ => None,
                };
                dirs.outputs.insert(base.clone(), out_decl.clone());
                generated_out.push(out_decl);

                if !dirs.inputs.contains_key(&base) {
                    let mut in_decl = next_in.clone();
                    in_decl.kind = IoKind::In;
                    in_decl.name = format!("in_{base}");
                    in_decl.initializer = None;
                    in_decl.array_size = match stage {
                        Stage::Vertex => None,
                        _ => Some(ArraySize::Unsized),
                    };
                    dirs.inputs.insert(base.clone(), in_decl.clone());
                    generated_in.push(in_decl);
                }
                let in_name = dirs.inputs[&base].name.clone();
                pass_through.push((format!("out_{base}"), in_name));
            }
        }

        if generated_out.is_empty() && generated_in.is_empty() {
            self.queue.push_back("#define HANDLE_IO(i)".to_string());
            return;
        }
        // synthesis only happens with a following stage present
        let Some(next_stage) = state.next_stage else {
            self.queue.push_back("#define HANDLE_IO(i)".to_string());
            return;
        };

        for decl in &generated_in {
            let renamed = format!("{}_{}", stage.prefix(), base_name(&decl.name));
            self.queue
                .push_back(format!("#define {} {}", decl.name, renamed));
            let mut emitted = decl.clone();
            emitted.name = renamed;
            self.queue.push_back(emitted.text());
        }
        for decl in &generated_out {
            let renamed = format!("{}_{}", next_stage.prefix(), base_name(&decl.name));
            self.queue
                .push_back(format!("#define {} {}", decl.name, renamed));
            let mut emitted = decl.clone();
            emitted.name = renamed;
            self.queue.push_back(emitted.text());
        }

        self.queue.push_back("void HANDLE_IO(int i) {".to_string());
        for (out_name, in_name) in pass_through {
            let line = match stage {
                Stage::Vertex => format!("    {out_name} = {in_name};"),
                Stage::TessControl => format!("    {out_name}[ID] = {in_name}[ID];"),
                Stage::TessEval => format!("    {out_name} = INTERPOLATE_VALUE({in_name});"),
                Stage::Geometry => format!("    {out_name} = {in_name}[i];"),
                Stage::Fragment => continue,
            };
            self.queue.push_back(line);
        }
        self.queue.push_back("}".to_string());
    }

    /// Applies a caller-supplied binding override to a parsed
    /// declaration. Returns the finished line for rewrites that bypass
    /// prefix renaming.
    fn apply_binding(decl: &mut Declaration, binding: &SpecifiedInput, base: &str) -> Option<String> {
        match binding {
            SpecifiedInput::Attribute => {
                if decl.kind != IoKind::Out {
                    decl.kind = IoKind::In;
                }
                decl.initializer = None;
                None
            }
            SpecifiedInput::Constant(args) => {
                decl.kind = IoKind::Const;
                decl.name = base.to_string();
                decl.initializer = Some(format!("{}({})", decl.ty, args));
                Some(decl.text())
            }
            SpecifiedInput::Uniform => {
                decl.kind = IoKind::Uniform;
                decl.name = base.to_string();
                decl.initializer = None;
                Some(decl.text())
            }
        }
    }
}

impl LineProcessor for IoProcessor {
    fn name(&self) -> &'static str {
        "io"
    }

    fn next_line(&mut self, state: &mut StageState<'_>) -> Option<String> {
        loop {
            if let Some(line) = self.queue.pop_front() {
                return Some(line);
            }
            let line = self.parent.as_mut()?.next_line(state)?;

            if is_handle_io_define(&line) {
                self.synthesize_handle_io(state);
                continue;
            }

            let is_empty = line.is_empty();
            if is_empty && self.was_empty {
                continue;
            }
            self.was_empty = is_empty;

            let Some(mut decl) = parse_declaration(&line) else {
                return Some(line);
            };
            let base = base_name(&decl.name).to_string();

            if let Some(binding) = state.input.specified_inputs.get(&base) {
                if let Some(rewritten) = Self::apply_binding(&mut decl, binding, &base) {
                    return Some(rewritten);
                }
            }

            let dirs = self.directories.entry(state.stage).or_default();
            match decl.kind {
                IoKind::In => {
                    if dirs.inputs.contains_key(&base) {
                        // base name already processed for this stage
                        continue;
                    }
                    let renamed = format!("{}_{base}", state.stage.prefix());
                    let define = format!("#define {} {renamed}", decl.name);
                    let mut emitted = decl.clone();
                    emitted.name = renamed;
                    self.queue.push_back(emitted.text());
                    dirs.inputs.insert(base, decl);
                    return Some(define);
                }
                IoKind::Out => {
                    if dirs.outputs.contains_key(&base) {
                        continue;
                    }
                    let emitted = match state.next_stage {
                        Some(next) => {
                            let renamed = format!("{}_{base}", next.prefix());
                            let define = format!("#define {} {renamed}", decl.name);
                            let mut emitted = decl.clone();
                            emitted.name = renamed;
                            self.queue.push_back(emitted.text());
                            define
                        }
                        // last stage in the pipeline keeps its name
                        None => decl.text(),
                    };
                    dirs.outputs.insert(base, decl);
                    return Some(emitted);
                }
                IoKind::Uniform => {
                    if dirs.uniforms.contains_key(&base) {
                        // included sections may redeclare shared uniforms
                        continue;
                    }
                    let emitted = decl.text();
                    dirs.uniforms.insert(base, decl);
                    return Some(emitted);
                }
                // const covers function-local constants too; emitted
                // as-is and never tracked
                IoKind::Const => return Some(decl.text()),
            }
        }
    }

    fn reset(&mut self) {
        self.directories.clear();
        self.queue.clear();
        self.was_empty = true;
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

/// Matches the bare `#define HANDLE_IO` synthesis trigger.
fn is_handle_io_define(line: &str) -> bool {
    let Some(rest) = line.trim_start().strip_prefix("#define") else {
        return false;
    };
    if !rest.starts_with([' ', '\t']) {
        return false;
    }
    let Some(rest) = rest.trim_start().strip_prefix("HANDLE_IO") else {
        return false;
    };
    rest.trim().is_empty()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stages::{InputProvider, PreProcessorInput};
    use crate::Includer;

    fn run_stage(
        processor: &mut IoProcessor,
        source: &str,
        stage: Stage,
        next_stage: Option<Stage>,
        input: &PreProcessorInput,
    ) -> Vec<String> {
        let mut includer = Includer::new();
        let mut state = StageState {
            stage,
            next_stage,
            version: crate::stages::DEFAULT_VERSION,
            source: source
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into_iter(),
            includer: &mut includer,
            input,
        };
        if processor.parent_mut().is_none() {
            processor.set_parent(Some(Box::new(InputProvider::new())));
        }
        let mut lines = Vec::new();
        while let Some(line) = processor.next_line(&mut state) {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn renames_vertex_input_with_stage_prefix() {
        let mut processor = IoProcessor::new();
        let input = PreProcessorInput::default();
        let out = run_stage(
            &mut processor,
            "in vec3 in_pos;",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(out, vec!["#define in_pos vs_pos", "in vec3 vs_pos;"]);
        assert!(processor.directories[&Stage::Vertex].inputs.contains_key("pos"));
    }

    #[test]
    fn renames_output_with_next_stage_prefix() {
        let mut processor = IoProcessor::new();
        let input = PreProcessorInput::default();
        let out = run_stage(
            &mut processor,
            "out vec3 out_normal;",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(out, vec!["#define out_normal fs_normal", "out vec3 fs_normal;"]);
    }

    #[test]
    fn final_stage_output_keeps_its_name() {
        let mut processor = IoProcessor::new();
        let input = PreProcessorInput::default();
        let out = run_stage(
            &mut processor,
            "out vec4 out_color;",
            Stage::Fragment,
            None,
            &input,
        );
        assert_eq!(out, vec!["out vec4 out_color;"]);
    }

    #[test]
    fn duplicate_declaration_is_suppressed() {
        let mut processor = IoProcessor::new();
        let input = PreProcessorInput::default();
        let out = run_stage(
            &mut processor,
            "in vec3 in_pos;\nin vec3 in_pos;",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(out, vec!["#define in_pos vs_pos", "in vec3 vs_pos;"]);
    }

    #[test]
    fn constant_binding_rewrites_without_renaming() {
        let mut processor = IoProcessor::new();
        let mut input = PreProcessorInput::default();
        input
            .specified_inputs
            .insert("foo".to_string(), SpecifiedInput::Constant("1,0,0".to_string()));
        let out = run_stage(
            &mut processor,
            "in vec3 in_foo;",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(out, vec!["const vec3 foo = vec3(1,0,0);"]);
    }

    #[test]
    fn uniform_binding_rewrites_to_uniform() {
        let mut processor = IoProcessor::new();
        let mut input = PreProcessorInput::default();
        input
            .specified_inputs
            .insert("mvp".to_string(), SpecifiedInput::Uniform);
        let out = run_stage(
            &mut processor,
            "in mat4 in_mvp;",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(out, vec!["uniform mat4 mvp;"]);
    }

    #[test]
    fn attribute_binding_forces_in_declaration() {
        let mut processor = IoProcessor::new();
        let mut input = PreProcessorInput::default();
        input
            .specified_inputs
            .insert("pos".to_string(), SpecifiedInput::Attribute);
        let out = run_stage(
            &mut processor,
            "uniform vec3 u_pos;",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(out, vec!["#define u_pos vs_pos", "in vec3 vs_pos;"]);
    }

    #[test]
    fn handle_io_synthesizes_missing_pass_through() {
        let mut processor = IoProcessor::new();
        let input = PreProcessorInput::default();
        // fragment first: declares the input the vertex stage must feed
        run_stage(
            &mut processor,
            "in vec3 in_color;",
            Stage::Fragment,
            None,
            &input,
        );
        let out = run_stage(
            &mut processor,
            "#define HANDLE_IO",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(
            out,
            vec![
                "#define in_color vs_color",
                "in vec3 vs_color;",
                "#define out_color fs_color",
                "out vec3 fs_color;",
                "void HANDLE_IO(int i) {",
                "    out_color = in_color;",
                "}",
            ]
        );
    }

    #[test]
    fn handle_io_with_nothing_missing_is_a_no_op_macro() {
        let mut processor = IoProcessor::new();
        let input = PreProcessorInput::default();
        run_stage(
            &mut processor,
            "in vec3 in_color;",
            Stage::Fragment,
            None,
            &input,
        );
        let out = run_stage(
            &mut processor,
            "out vec3 out_color;\n#define HANDLE_IO",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(out.last().map(String::as_str), Some("#define HANDLE_IO(i)"));
    }

    #[test]
    fn geometry_pass_through_indexes_inputs() {
        let mut processor = IoProcessor::new();
        let input = PreProcessorInput::default();
        run_stage(
            &mut processor,
            "in vec3 in_color;",
            Stage::Fragment,
            None,
            &input,
        );
        let out = run_stage(
            &mut processor,
            "#define HANDLE_IO",
            Stage::Geometry,
            Some(Stage::Fragment),
            &input,
        );
        assert!(out.contains(&"in vec3 gs_color[];".to_string()));
        assert!(out.contains(&"    out_color = in_color[i];".to_string()));
    }

    #[test]
    fn non_declaration_lines_pass_through() {
        let mut processor = IoProcessor::new();
        let input = PreProcessorInput::default();
        let out = run_stage(
            &mut processor,
            "void main() {\n    gl_Position = vec4(0.0);\n}",
            Stage::Vertex,
            Some(Stage::Fragment),
            &input,
        );
        assert_eq!(out, vec!["void main() {", "    gl_Position = vec4(0.0);", "}"]);
    }
}
