//! Source screening policy.
//!
//! Every submitted contract passes through here before anything is
//! compiled or persisted. The policy is structural: restricted
//! constructs are found in the parse tree, not by substring, so
//! contracts cannot smuggle them through formatting.

use mvm_core::{ScreeningError, CORE_IMPORT_PATH, MAX_SOURCE_SIZE};
use tracing::debug;

use crate::ast::{walk_exprs, walk_stmts, Expr, SourceFile, Stmt};
use crate::parser::parse_source;
use crate::token::Comment;

/// Comment prefixes the toolchain treats as directives: native code,
/// conditional compilation, linker tricks, foreign calls. Matched
/// case-insensitively against the first non-whitespace run of each
/// comment line.
const DIRECTIVE_PREFIXES: &[&str] = &[
    "go ", "+build", "-build", "go:", "line", "export", "extern", "cgo", "syscall", "unsafe",
    "runtime", "internal", "vendor",
];

#[derive(Debug, Clone)]
pub struct ScreenerConfig {
    pub max_source_size: usize,
    /// Import allow-list, matched by prefix (subpaths included).
    pub allowed_imports: Vec<String>,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            max_source_size: MAX_SOURCE_SIZE,
            allowed_imports: vec![CORE_IMPORT_PATH.to_string()],
        }
    }
}

/// Hook for the policy's final rule: the screened source must build
/// against the allowed dependencies. The toolchain-backed
/// implementation lives next to the compiler driver; tests disable
/// the probe with [`NoProbe`].
pub trait CompileProbe {
    fn probe(&self, source: &str) -> Result<(), String>;
}

/// Probe that accepts everything.
pub struct NoProbe;

impl CompileProbe for NoProbe {
    fn probe(&self, _source: &str) -> Result<(), String> {
        Ok(())
    }
}

pub struct Screener {
    config: ScreenerConfig,
}

impl Screener {
    pub fn new(config: ScreenerConfig) -> Self {
        Self { config }
    }

    /// Run the full policy. Returns the parsed file on acceptance so
    /// callers do not parse twice.
    pub fn screen(
        &self,
        source: &[u8],
        probe: &dyn CompileProbe,
    ) -> Result<SourceFile, ScreeningError> {
        if source.len() > self.config.max_source_size {
            return Err(ScreeningError::SizeExceeded {
                size: source.len(),
                max: self.config.max_source_size,
            });
        }

        let text = std::str::from_utf8(source).map_err(|e| ScreeningError::ParseFailed {
            line: 0,
            message: format!("source is not valid UTF-8: {e}"),
        })?;

        let file = parse_source(text).map_err(|e| ScreeningError::ParseFailed {
            line: e.line,
            message: e.message,
        })?;

        self.check_imports(&file)?;
        self.check_constructs(&file)?;
        self.check_comments(&file.comments)?;

        if file.exported_functions().next().is_none() {
            return Err(ScreeningError::NoExportedFunction);
        }

        probe
            .probe(text)
            .map_err(|output| ScreeningError::CompileProbeFailed { output })?;

        debug!(package = %file.package, "source accepted by screener");
        Ok(file)
    }

    fn check_imports(&self, file: &SourceFile) -> Result<(), ScreeningError> {
        for import in &file.imports {
            let allowed = self.config.allowed_imports.iter().any(|prefix| {
                import.path == *prefix
                    || import
                        .path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            });
            if !allowed {
                return Err(ScreeningError::DisallowedImport {
                    path: import.path.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_constructs(&self, file: &SourceFile) -> Result<(), ScreeningError> {
        for func in file.functions() {
            let Some(body) = &func.body else { continue };

            let mut found: Option<(u32, &'static str)> = None;
            walk_stmts(body, &mut |stmt| {
                if found.is_some() {
                    return;
                }
                match stmt {
                    Stmt::Go { line, .. } => found = Some((*line, "go statement")),
                    Stmt::Select { line, .. } => found = Some((*line, "select statement")),
                    Stmt::ForRange { line, .. } => found = Some((*line, "range iteration")),
                    _ => {}
                }
            });
            if let Some((line, construct)) = found {
                return Err(ScreeningError::RestrictedConstruct { line, construct });
            }

            let mut recover_line: Option<u32> = None;
            walk_exprs(body, &mut |expr| {
                if recover_line.is_some() {
                    return;
                }
                if let Expr::Call { func, line, .. } = expr {
                    if matches!(func.as_ref(), Expr::Ident { name, .. } if name == "recover") {
                        recover_line = Some(*line);
                    }
                }
            });
            if let Some(line) = recover_line {
                return Err(ScreeningError::RestrictedConstruct {
                    line,
                    construct: "recover builtin",
                });
            }
        }
        Ok(())
    }

    fn check_comments(&self, comments: &[Comment]) -> Result<(), ScreeningError> {
        for comment in comments {
            for (offset, line) in comment.text.lines().enumerate() {
                let trimmed = line.trim_start();
                if trimmed.is_empty() {
                    continue;
                }
                let lowered = trimmed.to_lowercase();
                if DIRECTIVE_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
                    let shown: String = trimmed.chars().take(24).collect();
                    return Err(ScreeningError::RestrictedCommentDirective {
                        line: comment.line + offset as u32,
                        directive: shown,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for Screener {
    fn default() -> Self {
        Self::new(ScreenerConfig::default())
    }
}
