//! Source transform for plugin dialects.
//!
//! Plugin files are Lua with embedded markup:
//!
//! ```text
//! function Component(props)
//!   local count, set_count = use_state(0)
//!   return <button class="counter" title={props.label}>Clicked {count} times</button>
//! end
//! ```
//!
//! Markup is rewritten into `h(tag, props, ...children)` calls. The typed
//! dialect additionally accepts Luau-style annotations, which are removed.
//! Every newline of the input survives, so Lua error line numbers point at
//! the plugin source.

mod annotations;
mod markup;
mod scanner;

use strum::{Display, EnumString};
use thiserror::Error;

use scanner::Transformer;

/// Extension of the plain markup dialect.
pub const MARKUP_EXTENSION: &str = "luax";

/// Extension of the typed dialect.
pub const TYPED_EXTENSION: &str = "tluax";

/// Source flavour, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    /// Lua with markup.
    Markup,

    /// Lua with markup and type annotations.
    Typed,
}

impl Dialect {
    /// Pick the dialect for a file. Unknown extensions use [`Dialect::Markup`].
    pub fn from_filename(filename: &str) -> Self {
        match extension(filename) {
            Some(TYPED_EXTENSION) => Self::Typed,
            _ => Self::Markup,
        }
    }

    /// File extension of this dialect, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markup => MARKUP_EXTENSION,
            Self::Typed => TYPED_EXTENSION,
        }
    }
}

fn extension(filename: &str) -> Option<&str> {
    filename.rsplit_once('.').map(|(_, ext)| ext)
}

/// Whether `filename` has one of the plugin extensions.
pub fn is_plugin_file(filename: &str) -> bool {
    matches!(
        extension(filename),
        Some(MARKUP_EXTENSION | TYPED_EXTENSION)
    )
}

/// Display name of a plugin: the filename without its dialect extension.
pub fn plugin_name(filename: &str) -> &str {
    [TYPED_EXTENSION, MARKUP_EXTENSION]
        .iter()
        .find_map(|ext| {
            filename
                .strip_suffix(ext)
                .and_then(|stem| stem.strip_suffix('.'))
        })
        .unwrap_or(filename)
}

/// A source that could not be transformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct TransformError {
    /// 1-based source line.
    pub line: usize,
    pub message: String,
}

/// Rewrite plugin source into plain Lua.
pub fn transform(source: &str, dialect: Dialect) -> Result<String, TransformError> {
    Transformer::new(source, dialect == Dialect::Typed).run()
}
