//! Template bodies: placeholder syntax and rendering.

pub mod render;
pub mod syntax;

use std::collections::BTreeMap;

pub use render::render_template;
pub use syntax::{
    extract_parameter_names, is_valid_parameter_name, tokenize, Segment, TemplateSyntaxError,
};

/// Parameter values keyed by parameter name.
pub type Parameters = BTreeMap<String, String>;

/// Upper bound on placeholders and other iteration-bounded loops.
pub const LOOP_LIMIT: usize = 1000;

/// Upper bound on character-by-character scanning loops.
pub const CHARACTER_LOOP_LIMIT: usize = 100_000;
