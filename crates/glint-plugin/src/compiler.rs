//! Turns plugin source into a renderable [`Component`].

use std::sync::Arc;

use mlua::{Lua, LuaOptions, MultiValue, StdLib, Value as LuaValue};
use thiserror::Error;
use tracing::{debug, warn};

use crate::component::{Component, PlaceholderKind};
use crate::lua::ScriptComponent;
use crate::lua::scope::Scope;
use crate::sandbox::SandboxConfig;
use crate::transform::{self, Dialect, TransformError};

/// Why a plugin did not produce a component.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Markup or annotations could not be rewritten.
    #[error("{0}")]
    Transform(#[from] TransformError),

    /// The rewritten source is not valid Lua.
    #[error("{message}")]
    Syntax { message: String },

    /// The module body raised an error or exhausted its budget.
    #[error("{message}")]
    Execution { message: String },

    /// Nothing was exported.
    #[error("no component exported")]
    MissingExport,

    /// The export is not a function.
    #[error("exported {source_name} is a {type_name}, not a function")]
    NotCallable {
        source_name: &'static str,
        type_name: &'static str,
    },
}

/// Coarse failure class, which selects the placeholder shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    Compile,
    Execution,
    MissingExport,
}

impl CompileError {
    pub fn stage(&self) -> CompileStage {
        match self {
            Self::Transform(_) | Self::Syntax { .. } => CompileStage::Compile,
            Self::Execution { .. } | Self::NotCallable { .. } => CompileStage::Execution,
            Self::MissingExport => CompileStage::MissingExport,
        }
    }

    fn execution(err: mlua::Error) -> Self {
        Self::Execution {
            message: err.to_string(),
        }
    }
}

impl From<CompileStage> for PlaceholderKind {
    fn from(stage: CompileStage) -> Self {
        match stage {
            CompileStage::Compile => Self::Compile,
            CompileStage::Execution => Self::Execution,
            CompileStage::MissingExport => Self::MissingExport,
        }
    }
}

/// Compiles plugin source. Each compiled plugin gets its own Lua state.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    sandbox: SandboxConfig,
}

impl Compiler {
    pub fn new(sandbox: SandboxConfig) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &SandboxConfig {
        &self.sandbox
    }

    /// Compile `source`, choosing the dialect from `filename`. Never fails:
    /// errors become placeholder components.
    pub fn compile(&self, source: &str, filename: &str) -> Component {
        let dialect = Dialect::from_filename(filename);
        match self.compile_to_component(source, dialect, filename) {
            Ok(script) => Component::Script(Arc::new(script)),
            Err(err) => {
                warn!(plugin = filename, stage = ?err.stage(), "Plugin failed to compile: {err}");
                Component::placeholder(err.stage().into(), filename, err.to_string())
            }
        }
    }

    /// Transform, load and run a plugin module, then resolve its component.
    pub fn compile_to_component(
        &self,
        source: &str,
        dialect: Dialect,
        filename: &str,
    ) -> Result<ScriptComponent, CompileError> {
        let code = transform::transform(source, dialect)?;
        debug!(plugin = filename, %dialect, bytes = code.len(), "Transformed plugin source");

        let lua = Lua::new_with(
            StdLib::MATH | StdLib::STRING | StdLib::TABLE | StdLib::UTF8,
            LuaOptions::default(),
        )
        .map_err(CompileError::execution)?;
        self.sandbox.limit_memory(&lua).map_err(CompileError::execution)?;
        let scope = Scope::new(&lua, filename).map_err(CompileError::execution)?;

        let chunk = lua
            .load(code.as_str())
            .set_name(format!("={filename}"))
            .set_environment(scope.env.clone())
            .into_function()
            .map_err(|e| CompileError::Syntax {
                message: e.to_string(),
            })?;

        let returned = {
            let _budget = self.sandbox.budget().arm(&lua).map_err(CompileError::execution)?;
            chunk.call::<MultiValue>(()).map_err(CompileError::execution)?
        };
        debug!(plugin = filename, "Executed plugin module");

        let factory = resolve(&scope, returned).map_err(CompileError::execution)??;
        Ok(ScriptComponent::new(lua, factory, scope, self.sandbox, filename, dialect))
    }
}

/// Find the exported component, in order: a global `Component`,
/// `exports.default`, a function assigned to `module.exports`, a function
/// returned by the chunk.
fn resolve(
    scope: &Scope,
    returned: MultiValue,
) -> mlua::Result<Result<mlua::Function, CompileError>> {
    let module_exports: LuaValue = scope.module.raw_get("exports")?;
    let exports = match &module_exports {
        LuaValue::Table(table) => table.clone(),
        _ => scope.exports.clone(),
    };

    let named = [
        ("Component", scope.env.raw_get::<LuaValue>("Component")?),
        ("exports.default", exports.raw_get::<LuaValue>("default")?),
    ];
    for (source_name, value) in named {
        match value {
            LuaValue::Nil => continue,
            LuaValue::Function(factory) => return Ok(Ok(factory)),
            other => {
                return Ok(Err(CompileError::NotCallable {
                    source_name,
                    type_name: other.type_name(),
                }));
            }
        }
    }

    if let LuaValue::Function(factory) = module_exports {
        return Ok(Ok(factory));
    }
    if let Some(LuaValue::Function(factory)) = returned.into_iter().next() {
        return Ok(Ok(factory));
    }
    Ok(Err(CompileError::MissingExport))
}
