//! Script execution for the command line.

use anyhow::{Context as _, Result};
use ctxbridge::{Bridge, BridgeError, Context, ContextOptions, FunctionCallbackInfo, ObjectTemplate};
use serde_json::Value as JsonValue;
use std::fs::read_to_string;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One script to run, with the origin its errors are reported against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub origin: String,
    pub source: String,
}

impl Input {
    pub fn read(path: &Path) -> Result<Self> {
        let source = read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        Ok(Self {
            origin: path.display().to_string(),
            source,
        })
    }
}

/// Snippets first, labelled `<eval:N>`, then files in order.
pub fn collect_inputs(snippets: &[String], files: &[PathBuf]) -> Result<Vec<Input>> {
    let mut inputs: Vec<Input> = snippets
        .iter()
        .enumerate()
        .map(|(index, source)| Input {
            origin: format!("<eval:{}>", index + 1),
            source: source.clone(),
        })
        .collect();
    for path in files {
        inputs.push(Input::read(path)?);
    }
    Ok(inputs)
}

/// Render `print` arguments: strings verbatim, everything else as JSON.
fn render_args(args: &[JsonValue]) -> String {
    args.iter()
        .map(|arg| match arg {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn print(info: &FunctionCallbackInfo) -> Result<JsonValue, String> {
    writeln!(io::stdout(), "{}", render_args(info.args())).map_err(|err| err.to_string())?;
    Ok(JsonValue::Null)
}

/// Global template installed into every context the runner creates.
pub fn global_template() -> ObjectTemplate {
    let mut template = ObjectTemplate::new();
    template.set_function("print", print);
    template
}

/// Runs inputs against one shared context, or a fresh context each.
pub struct Runner<Out, Diag> {
    bridge: Bridge,
    shared: Option<Context>,
    isolated: bool,
    quiet: bool,
    out: Out,
    err: Diag,
}

impl<Out: Write, Diag: Write> Runner<Out, Diag> {
    pub fn new(bridge: Bridge, isolated: bool, quiet: bool, out: Out, err: Diag) -> Self {
        Self {
            bridge,
            shared: None,
            isolated,
            quiet,
            out,
            err,
        }
    }

    fn context(&mut self) -> Result<Context> {
        let options = || ContextOptions::new().with_global_template(global_template());
        if self.isolated {
            return Ok(self.bridge.new_context(options())?);
        }
        if let Some(context) = &self.shared {
            return Ok(context.clone());
        }
        let context = self.bridge.new_context(options())?;
        self.shared = Some(context.clone());
        Ok(context)
    }

    /// Run every input, returning how many failed with a script error or
    /// an unprintable result.
    ///
    /// Other failures abort the run.
    pub fn run_all(&mut self, inputs: &[Input]) -> Result<usize> {
        let mut failures = 0;
        for input in inputs {
            let context = self.context()?;
            debug!(origin = %input.origin, reference = %context.reference_id(), "running input");
            match context.run_script(&input.source, &input.origin) {
                Ok(Some(value)) if !self.quiet => match value.to_json() {
                    Ok(json) => writeln!(self.out, "{}", serde_json::to_string(&json)?)?,
                    Err(err) => {
                        failures += 1;
                        writeln!(self.err, "{}: result not printable: {err}", input.origin)?;
                    }
                },
                Ok(_) => {}
                Err(BridgeError::Script(err)) => {
                    failures += 1;
                    writeln!(self.err, "{}: {err:#}", input.origin)?;
                }
                Err(err) => return Err(err.into()),
            }
            if self.isolated {
                context.close();
            }
        }
        Ok(failures)
    }
}
