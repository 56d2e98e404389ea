use crate::{DirectiveProcessor, Includer, IoProcessor};
use shaderpipe_common::map::FastHashMap;
use shaderpipe_common::Stage;
use std::collections::BTreeSet;

/// The `#version` used when no stage source declares one.
pub const DEFAULT_VERSION: u32 = 150;

/// Caller-supplied binding for a declared base name. Overrides how a
/// generic declaration is rewritten.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SpecifiedInput {
    /// Per-vertex attribute; the declaration becomes an `in`.
    Attribute,
    /// The declaration becomes a `uniform`.
    Uniform,
    /// Compile-time constant; holds the constructor arguments, e.g.
    /// `"1,0,0"` for a `vec3`.
    Constant(String),
}

/// Input for one whole-program preprocessing run.
#[derive(Debug, Default)]
pub struct PreProcessorInput {
    /// Header prepended to every stage.
    pub header: String,
    /// Per-stage raw source: literal text or a dotted include key.
    pub sources: FastHashMap<Stage, String>,
    /// Include-key -> literal replacement text, consulted before the
    /// [`Includer`].
    pub extern_functions: FastHashMap<String, String>,
    /// Base-name -> binding override for declarations.
    pub specified_inputs: FastHashMap<String, SpecifiedInput>,
}

/// State shared by all processors while one stage is pulled through the
/// chain.
pub struct StageState<'a> {
    /// The stage currently being processed.
    pub stage: Stage,
    /// The pipeline stage following `stage`, if it survived processing.
    pub next_stage: Option<Stage>,
    /// Running maximum of all `#version` directives seen this run.
    pub version: u32,
    /// Assembled unprocessed input for the current stage.
    pub source: std::vec::IntoIter<String>,
    pub includer: &'a mut Includer,
    pub input: &'a PreProcessorInput,
}

/// A pull-based line filter. Processors are chained through an optional
/// parent pointer; requesting a line recursively pulls from the parent
/// until a line survives filtering.
pub trait LineProcessor {
    /// Identifies the processor for [`PreProcessor::remove_processor`].
    fn name(&self) -> &'static str;
    /// Produces the next surviving line, or `None` when the stage input
    /// is exhausted.
    fn next_line(&mut self, state: &mut StageState<'_>) -> Option<String>;
    /// Resets the processor to its initial state between runs.
    fn reset(&mut self);
    fn set_parent(&mut self, parent: Option<Box<dyn LineProcessor>>);
    fn take_parent(&mut self) -> Option<Box<dyn LineProcessor>>;
    fn parent_mut(&mut self) -> Option<&mut Box<dyn LineProcessor>>;
}

/// Root of the chain; hands out the assembled stage input line by line.
#[derive(Default)]
pub struct InputProvider {
    parent: Option<Box<dyn LineProcessor>>,
}

impl InputProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LineProcessor for InputProvider {
    fn name(&self) -> &'static str {
        "input"
    }

    fn next_line(&mut self, state: &mut StageState<'_>) -> Option<String> {
        state.source.next()
    }

    fn reset(&mut self) {}

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

/// Drives per-stage expansion through a chain of [`LineProcessor`]s.
///
/// Stages are processed in reverse pipeline order because each stage's
/// interface synthesis needs the following stage's declared inputs.
#[derive(Default)]
pub struct PreProcessor {
    last: Option<Box<dyn LineProcessor>>,
}

impl PreProcessor {
    /// An empty chain. At minimum an [`InputProvider`] must be added for
    /// any line to be produced.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain: input provider, directive processor, IO
    /// processor.
    pub fn standard() -> Self {
        let mut pre = PreProcessor::new();
        pre.add_processor(Box::new(InputProvider::new()));
        pre.add_processor(Box::new(DirectiveProcessor::new()));
        pre.add_processor(Box::new(IoProcessor::new()));
        pre
    }

    /// Appends a processor; it pulls its input from the previously added
    /// one.
    pub fn add_processor(&mut self, mut processor: Box<dyn LineProcessor>) {
        processor.set_parent(self.last.take());
        self.last = Some(processor);
    }

    /// Unlinks the named processor, reconnecting its neighbours.
    pub fn remove_processor(&mut self, name: &str) {
        let mut chain = self.last.take();
        let mut kept = Vec::new();
        while let Some(mut processor) = chain {
            chain = processor.take_parent();
            if processor.name() != name {
                kept.push(processor);
            }
        }
        let mut rebuilt: Option<Box<dyn LineProcessor>> = None;
        for mut processor in kept.into_iter().rev() {
            processor.set_parent(rebuilt.take());
            rebuilt = Some(processor);
        }
        self.last = rebuilt;
    }

    /// Expands every authored stage into a final compilable source.
    ///
    /// Stages whose fully expanded text contains no `void main()` are
    /// absent from the result; they are treated as not authored for this
    /// program, not as an error.
    pub fn process_stages(
        &mut self,
        includer: &mut Includer,
        input: &PreProcessorInput,
    ) -> FastHashMap<Stage, String> {
        let mut processed = FastHashMap::default();

        // candidate effect names, used to locate a default vertex shader
        let mut effect_names = BTreeSet::new();
        for source in input.sources.values() {
            if !source.is_empty() && includer.is_key_valid(source) {
                if let Some(first) = source.split('.').next() {
                    effect_names.insert(first.to_string());
                }
            }
        }

        let mut state = StageState {
            stage: Stage::Fragment,
            next_stage: None,
            version: DEFAULT_VERSION,
            source: Vec::new().into_iter(),
            includer,
            input,
        };

        for &stage in Stage::PIPELINE.iter().rev() {
            let mut code = input
                .sources
                .get(&stage)
                .filter(|source| !source.is_empty())
                .cloned();
            if code.is_none() && stage == Stage::Vertex {
                for effect in &effect_names {
                    let key = format!("{effect}.vs");
                    if !state.includer.include(&key).is_empty() {
                        code = Some(key);
                        break;
                    }
                }
            }
            let Some(code) = code else { continue };

            state.stage = stage;
            let mut assembled = format!("#define SHADER_STAGE {}\n", stage.prefix());
            assembled.push_str(&input.header);
            assembled.push('\n');
            if state.includer.is_key_valid(&code) {
                assembled.push_str(&format!("#include {code}\n"));
            } else {
                assembled.push_str(&code);
                assembled.push('\n');
            }
            state.source = assembled
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into_iter();

            let mut out = String::new();
            while let Some(line) = self.last.as_mut().and_then(|p| p.next_line(&mut state)) {
                out.push_str(&line);
                out.push('\n');
            }

            // some drivers are strict about the version statement coming first
            let mut source = format!("#version {}\n", state.version);
            source.push_str(&out);
            if !has_main(&source) {
                continue;
            }
            processed.insert(stage, source);
            state.next_stage = Some(stage);
        }

        self.clear_processors();
        processed
    }

    fn clear_processors(&mut self) {
        let mut current = self.last.as_mut();
        while let Some(processor) = current {
            processor.reset();
            current = processor.parent_mut();
        }
    }
}

/// Whether the expanded source defines `void main()` (with an optional
/// `void` parameter list) followed by a body. At least one whitespace
/// character must separate `void` from `main`.
fn has_main(source: &str) -> bool {
    let mut search = source;
    while let Some(pos) = search.find("void") {
        let rest = &search[pos + 4..];
        let rest = if rest.starts_with(char::is_whitespace) {
            rest.trim_start()
        } else {
            search = &search[pos + 4..];
            continue;
        };
        if let Some(after) = rest.strip_prefix("main") {
            let after = after.trim_start();
            if let Some(args) = after.strip_prefix('(') {
                if let Some(close) = args.find(')') {
                    let params = args[..close].trim();
                    if (params.is_empty() || params == "void")
                        && args[close + 1..].trim_start().starts_with('{')
                    {
                        return true;
                    }
                }
            }
        }
        search = &search[pos + 4..];
    }
    false
}
