//! Main orchestration logic.

use crate::cli::{Args, CheckArgs, Command, CompileArgs, OutputFormat, RenderArgs};
use crate::config::GspConfig;
use crate::output::{listing, CheckSummary, Formatter, TemplateDiagnostic};
use camino::{Utf8Path, Utf8PathBuf};
use gsp_parser::{ParseError, ParseOptions, ParsedPage};
use gsp_runtime::{
    compile, render, Bindings, ChannelEncoders, CodecRegistry, EncodingStateRegistry, RenderEnv,
    Value,
};
use miette::Diagnostic;
use rayon::prelude::*;
use smol_str::SmolStr;
use std::fs;
use std::io::{self, Write};
use std::time::Instant;
use text_size::TextSize;
use thiserror::Error;
use walkdir::WalkDir;

/// Orchestration errors.
#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    /// Failed to read a file.
    #[error("failed to read {path}")]
    #[diagnostic(code(gsp::io))]
    ReadFailed {
        /// The file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Failed to write output.
    #[error("failed to write output")]
    #[diagnostic(code(gsp::io))]
    WriteFailed(#[source] io::Error),

    /// The model file is not a JSON object.
    #[error("invalid model {path}: {message}")]
    #[diagnostic(
        code(gsp::model),
        help("the model must be a JSON object whose keys are page variable names")
    )]
    InvalidModel {
        /// The model file.
        path: Utf8PathBuf,
        /// What was wrong with it.
        message: String,
    },

    /// The current directory is not valid UTF-8.
    #[error("working directory is not valid UTF-8")]
    #[diagnostic(code(gsp::workspace))]
    InvalidWorkspace,
}

/// Result of a command.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Number of templates processed.
    pub file_count: usize,
    /// Number of templates that failed.
    pub error_count: usize,
}

/// Runs the selected command.
pub fn run(args: &Args) -> Result<RunSummary, OrchestratorError> {
    let workspace = resolve_workspace(&args.workspace)?;
    let config = GspConfig::load(&workspace)
        .with_overrides(args.default_codec.as_deref(), args.encoding.as_deref());
    let session = Session {
        options: config.parse_options(),
        config,
        workspace,
    };

    match &args.command {
        Command::Check(check) => session.check(check),
        Command::Compile(compile) => session.compile(compile),
        Command::Render(render) => session.render(render),
    }
}

fn resolve_workspace(workspace: &Utf8Path) -> Result<Utf8PathBuf, OrchestratorError> {
    if workspace.is_absolute() {
        return Ok(workspace.to_path_buf());
    }
    let current = std::env::current_dir()
        .ok()
        .and_then(|dir| Utf8PathBuf::try_from(dir).ok())
        .ok_or(OrchestratorError::InvalidWorkspace)?;
    Ok(current.join(workspace))
}

/// Settings shared by all commands of one invocation.
struct Session {
    workspace: Utf8PathBuf,
    config: GspConfig,
    options: ParseOptions,
}

/// A template loaded from disk.
struct Template {
    display_name: String,
    source: String,
}

impl Session {
    fn display_name(&self, path: &Utf8Path) -> String {
        path.strip_prefix(&self.workspace)
            .unwrap_or(path)
            .to_string()
    }

    fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    /// Reads and decodes a template. Decoding failures are reported as
    /// parse errors.
    fn load(&self, path: &Utf8Path) -> Result<Result<Template, ParseError>, OrchestratorError> {
        let display_name = self.display_name(path);
        let bytes = fs::read(path).map_err(|source| OrchestratorError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(gsp_parser::decode(&bytes, self.config.encoding())
            .map(|source| Template {
                display_name: display_name.clone(),
                source: source.into_owned(),
            })
            .map_err(|kind| ParseError::new(kind, 1, TextSize::from(0)).in_source(&display_name)))
    }

    fn parse(&self, template: &Template) -> Result<ParsedPage, ParseError> {
        gsp_parser::parse_with_options(&template.display_name, &template.source, &self.options)
    }

    /// Finds the templates under the given paths, sorted.
    fn collect_files(&self, paths: &[Utf8PathBuf]) -> Vec<Utf8PathBuf> {
        let roots = if paths.is_empty() {
            vec![self.workspace.clone()]
        } else {
            paths.iter().map(|path| self.resolve(path)).collect()
        };
        let extensions = self.config.file_extensions();
        let mut files: Vec<Utf8PathBuf> = roots
            .iter()
            .flat_map(|root| {
                WalkDir::new(root)
                    .into_iter()
                    .filter_entry(|entry| {
                        let Some(path) = Utf8Path::from_path(entry.path()) else {
                            return false;
                        };
                        let relative = path.strip_prefix(&self.workspace).unwrap_or(path);
                        entry.depth() == 0 || !self.config.is_excluded(relative)
                    })
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .filter_map(|e| Utf8PathBuf::try_from(e.into_path()).ok())
                    .filter(|p| {
                        let file_name = p.file_name().unwrap_or("");
                        extensions.iter().any(|ext| file_name.ends_with(ext))
                    })
            })
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// Compiles every template and reports the failures.
    fn check(&self, args: &CheckArgs) -> Result<RunSummary, OrchestratorError> {
        let scan_start = Instant::now();
        let files = self.collect_files(&args.paths);
        log::debug!(
            "found {} templates in {:?}",
            files.len(),
            scan_start.elapsed()
        );

        let codecs = CodecRegistry::default();
        let results: Vec<Result<Option<(Template, TemplateDiagnostic)>, OrchestratorError>> = files
            .par_iter()
            .map(|path| {
                let template = match self.load(path)? {
                    Ok(template) => template,
                    Err(error) => {
                        let name = self.display_name(path);
                        let diag = TemplateDiagnostic::from_parse(&name, &error);
                        let template = Template {
                            display_name: name,
                            source: String::new(),
                        };
                        return Ok(Some((template, diag)));
                    }
                };
                let diag = match self.parse(&template) {
                    Err(error) => Some(TemplateDiagnostic::from_parse(
                        &template.display_name,
                        &error,
                    )),
                    Ok(page) => ChannelEncoders::for_page(&page.codecs, &codecs)
                        .err()
                        .map(|error| {
                            TemplateDiagnostic::from_codec(&template.display_name, &error)
                        }),
                };
                Ok(diag.map(|diag| (template, diag)))
            })
            .collect();

        let formatter = Formatter::new(args.output);
        let mut diagnostics = Vec::new();
        let mut stdout = io::stdout().lock();
        for result in results {
            let Some((template, diag)) = result? else {
                continue;
            };
            let text = formatter.format(std::slice::from_ref(&diag), &template.source);
            stdout
                .write_all(text.as_bytes())
                .map_err(OrchestratorError::WriteFailed)?;
            diagnostics.push(diag);
        }

        let summary = CheckSummary {
            file_count: files.len(),
            error_count: diagnostics.len(),
        };
        let footer = if args.output == OutputFormat::Json {
            Formatter::format_json(&diagnostics)
        } else {
            summary.format()
        };
        writeln!(stdout, "{footer}").map_err(OrchestratorError::WriteFailed)?;

        Ok(RunSummary {
            file_count: summary.file_count,
            error_count: summary.error_count,
        })
    }

    /// Prints the operations of one template.
    fn compile(&self, args: &CompileArgs) -> Result<RunSummary, OrchestratorError> {
        let path = self.resolve(&args.file);
        let outcome = self
            .load(&path)?
            .and_then(|template| self.parse(&template).map(|page| (template, page)));
        let (_template, page) = match outcome {
            Ok(loaded) => loaded,
            Err(error) => return self.report_parse_error(&path, &error),
        };

        let text = if args.json {
            serde_json::to_string_pretty(&page).map_err(|error| {
                OrchestratorError::WriteFailed(io::Error::new(io::ErrorKind::InvalidData, error))
            })? + "\n"
        } else {
            listing(&page)
        };
        io::stdout()
            .lock()
            .write_all(text.as_bytes())
            .map_err(OrchestratorError::WriteFailed)?;
        Ok(RunSummary {
            file_count: 1,
            error_count: 0,
        })
    }

    /// Renders one template with the core tag library.
    fn render(&self, args: &RenderArgs) -> Result<RunSummary, OrchestratorError> {
        let path = self.resolve(&args.file);
        let bindings = match &args.model {
            Some(model) => load_model(&self.resolve(model))?,
            None => Bindings::new(),
        };
        let outcome = self
            .load(&path)?
            .and_then(|template| self.parse(&template).map(|page| (template, page)));
        let (template, page) = match outcome {
            Ok(loaded) => loaded,
            Err(error) => return self.report_parse_error(&path, &error),
        };

        let page = compile(page);
        let env = RenderEnv::default();
        let mut html = Vec::new();
        let mut registry = EncodingStateRegistry::new();
        if let Err(error) = render(&page, bindings, &mut html, &mut registry, &env) {
            let diag = TemplateDiagnostic::from_render(&template.display_name, &error);
            eprint!(
                "{}",
                Formatter::new(OutputFormat::HumanVerbose).format(&[diag], &template.source)
            );
            return Ok(RunSummary {
                file_count: 1,
                error_count: 1,
            });
        }

        match &args.out {
            Some(out) => fs::write(self.resolve(out), &html),
            None => io::stdout().lock().write_all(&html),
        }
        .map_err(OrchestratorError::WriteFailed)?;
        Ok(RunSummary {
            file_count: 1,
            error_count: 0,
        })
    }

    fn report_parse_error(
        &self,
        path: &Utf8Path,
        error: &ParseError,
    ) -> Result<RunSummary, OrchestratorError> {
        let source = fs::read(path)
            .ok()
            .and_then(|bytes| {
                gsp_parser::decode(&bytes, self.config.encoding())
                    .ok()
                    .map(|source| source.into_owned())
            })
            .unwrap_or_default();
        let diag = TemplateDiagnostic::from_parse(&self.display_name(path), error);
        eprint!(
            "{}",
            Formatter::new(OutputFormat::HumanVerbose).format(&[diag], &source)
        );
        Ok(RunSummary {
            file_count: 1,
            error_count: 1,
        })
    }
}

/// Reads a JSON object into page variables.
pub fn load_model(path: &Utf8Path) -> Result<Bindings, OrchestratorError> {
    let content = fs::read_to_string(path).map_err(|source| OrchestratorError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |message: String| OrchestratorError::InvalidModel {
        path: path.to_path_buf(),
        message,
    };
    let json: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
    match json {
        serde_json::Value::Object(entries) => Ok(entries
            .into_iter()
            .map(|(key, value)| (SmolStr::from(key), json_to_value(value)))
            .collect()),
        other => Err(invalid(format!("expected an object, found {}", json_kind(&other)))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Converts JSON into a template value.
pub fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(entries) => entries
            .into_iter()
            .map(|(key, value)| (SmolStr::from(key), json_to_value(value)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_json_to_value() {
        let value = json_to_value(json!({
            "name": "Ada",
            "age": 36,
            "ratio": 0.5,
            "tags": ["a", null],
            "admin": true
        }));
        let Value::Map(entries) = value else {
            panic!("expected a map");
        };
        assert_eq!(entries["name"].to_string(), "Ada");
        assert!(matches!(entries["age"], Value::Int(36)));
        assert!(matches!(entries["ratio"], Value::Float(r) if r == 0.5));
        assert!(entries["tags"].loose_eq(&Value::List(vec![Value::from("a"), Value::Null])));
        assert!(matches!(entries["admin"], Value::Bool(true)));
    }

    #[test]
    fn test_load_model_rejects_arrays() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("model.json")).unwrap();
        fs::write(&path, "[1, 2]").unwrap();
        let error = load_model(&path).unwrap_err();
        assert!(matches!(error, OrchestratorError::InvalidModel { .. }));
        assert!(error.to_string().ends_with("expected an object, found an array"));
    }

    #[test]
    fn test_collect_files_skips_excluded() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("views/user")).unwrap();
        fs::create_dir_all(root.join("build/views")).unwrap();
        fs::write(root.join("views/user/show.gsp"), "x").unwrap();
        fs::write(root.join("views/index.gsp"), "x").unwrap();
        fs::write(root.join("views/notes.txt"), "x").unwrap();
        fs::write(root.join("build/views/copy.gsp"), "x").unwrap();

        let session = Session {
            workspace: root.clone(),
            config: GspConfig::default(),
            options: ParseOptions::default(),
        };
        let files: Vec<String> = session
            .collect_files(&[])
            .iter()
            .map(|path| session.display_name(path))
            .collect();
        assert_eq!(files, vec!["views/index.gsp", "views/user/show.gsp"]);
    }
}
