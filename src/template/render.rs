//! Placeholder substitution.

use super::syntax::{tokenize, Segment};
use super::Parameters;
use crate::error::PipelineExecutionError;

/// Replace every `{name}` in `template` with its value from `parameters`.
///
/// Substituted values are copied verbatim and never scanned again, so a value
/// containing `{other}` stays literal text in the output.
pub fn render_template(
    template: &str,
    parameters: &Parameters,
) -> Result<String, PipelineExecutionError> {
    let segments = tokenize(template)?;
    let mut rendered = String::with_capacity(template.len());

    for segment in segments {
        match segment {
            Segment::Text(text) => rendered.push_str(text),
            Segment::Placeholder(name) => {
                let value = parameters
                    .get(name)
                    .ok_or_else(|| PipelineExecutionError::MissingParameterValue(name.to_string()))?;
                rendered.push_str(value);
            }
        }
    }

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateSyntaxError;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_values() {
        let rendered =
            render_template("echo: {x} and {y}", &params(&[("x", "hello"), ("y", "bye")]))
                .unwrap();
        assert_eq!(rendered, "echo: hello and bye");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let rendered = render_template(
            "{a}",
            &params(&[("a", "{b}"), ("b", "should not appear")]),
        )
        .unwrap();
        assert_eq!(rendered, "{b}");
    }

    #[test]
    fn test_render_missing_value() {
        let err = render_template("{missing}", &Parameters::new()).unwrap_err();
        assert_eq!(
            err,
            PipelineExecutionError::MissingParameterValue("missing".to_string())
        );
    }

    #[test]
    fn test_render_syntax_error() {
        let err = render_template("oops }", &Parameters::new()).unwrap_err();
        assert_eq!(
            err,
            PipelineExecutionError::Render(TemplateSyntaxError::UnmatchedClosingBrace {
                position: 5
            })
        );
    }
}
