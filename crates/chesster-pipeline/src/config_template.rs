//! Resolves the training configuration from its YAML template.
//!
//! The template is treated as text. Only the values of the `data_path:` and
//! `base_model:` entries are replaced, wherever they sit in the file.

use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::PipelineError;

pub const DATA_PATH_FIELD: &str = "data_path";
pub const BASE_MODEL_FIELD: &str = "base_model";

/// Replaces both field values in `template`, failing if either entry is absent.
pub fn render_config(
    template: &str,
    data_path: &str,
    base_model: &str,
) -> Result<String, PipelineError> {
    let rendered = replace_field(template, data_path_regex(), DATA_PATH_FIELD, data_path)?;
    replace_field(&rendered, base_model_regex(), BASE_MODEL_FIELD, base_model)
}

/// Reads the template at `template_path` and renders it.
pub fn build_config(
    template_path: &Path,
    data_path: &str,
    base_model: &str,
) -> Result<String, PipelineError> {
    let template = match std::fs::read_to_string(template_path) {
        Ok(template) => template,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::ConfigTemplateMissing {
                path: template_path.to_path_buf(),
            })
        }
        Err(error) => return Err(PipelineError::Io(error)),
    };
    render_config(&template, data_path, base_model)
}

fn replace_field(
    text: &str,
    pattern: &Regex,
    field: &'static str,
    value: &str,
) -> Result<String, PipelineError> {
    if !pattern.is_match(text) {
        return Err(PipelineError::ConfigFieldMissing { field });
    }
    let quoted = format!("'{}'", value.replace('\'', "''"));
    Ok(pattern
        .replace_all(text, |captures: &Captures<'_>| {
            format!("{}{}{}", &captures[1], quoted, &captures[2])
        })
        .into_owned())
}

fn data_path_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| field_regex(DATA_PATH_FIELD))
}

fn base_model_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| field_regex(BASE_MODEL_FIELD))
}

/// Matches a field line. A quoted value is consumed whole, so a `#` inside the
/// quotes is not taken for a trailing comment.
fn field_regex(field: &str) -> Regex {
    let pattern = format!(
        r#"(?mR)^([ \t]*{}[ \t]*:[ \t]*)(?:{}|{}|[^\r\n#]*?)([ \t]*(?:#[^\r\n]*)?)$"#,
        regex::escape(field),
        r"'(?:[^'\r\n]|'')*'",
        r#""(?:[^"\\\r\n]|\\.)*""#,
    );
    Regex::new(&pattern).expect("field pattern compiles")
}

#[cfg(test)]
mod tests {
    use super::{build_config, render_config};
    use crate::error::PipelineError;

    const TEMPLATE: &str = "\
%YAML 1.2
---
name: 'maia-transfer'
dataset:
  data_path: '<DATA_PATH>'
  num_chunks: 400000
training:
  base_model: <BASE_MODEL>  # replaced per run
  total_steps: 2000
";

    #[test]
    fn functional_both_placeholders_are_replaced_by_pattern() {
        let rendered =
            render_config(TEMPLATE, "/session/data/", "maia-1500.pb.gz").expect("render");
        assert!(rendered.contains("  data_path: '/session/data/'\n"));
        assert!(rendered.contains("  base_model: 'maia-1500.pb.gz'"));
        assert!(rendered.contains("# replaced per run"));
        assert!(!rendered.contains("<DATA_PATH>"));
        assert!(!rendered.contains("<BASE_MODEL>"));
        assert!(rendered.contains("num_chunks: 400000"));
    }

    #[test]
    fn unit_missing_field_is_reported_by_name() {
        let error =
            render_config("dataset:\n  data_path: x\n", "/d", "m").expect_err("no base_model");
        assert!(matches!(
            error,
            PipelineError::ConfigFieldMissing {
                field: "base_model"
            }
        ));
    }

    #[test]
    fn regression_missing_template_fails_instead_of_using_a_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("config.yaml");
        let error = build_config(&missing, "/session/data/", "maia-1100.pb.gz")
            .expect_err("template missing");
        assert!(matches!(error, PipelineError::ConfigTemplateMissing { .. }));
        assert!(error.to_string().contains("config.yaml"));
    }

    #[test]
    fn regression_hash_inside_quoted_value_is_not_a_comment() {
        let template = "\
dataset:
  data_path: '/old#dir/data'  # note
  base_model: \"maia#old.pb.gz\"
";
        let rendered =
            render_config(template, "/session/data/", "maia-1300.pb.gz").expect("render");
        assert_eq!(
            rendered,
            "dataset:\n  data_path: '/session/data/'  # note\n  base_model: 'maia-1300.pb.gz'\n"
        );
    }

    #[test]
    fn unit_values_with_dollar_signs_stay_literal() {
        let rendered = render_config(
            "data_path: a\nbase_model: b\n",
            "/runs/$HOME/data",
            "maia-1900.pb.gz",
        )
        .expect("render");
        assert_eq!(
            rendered,
            "data_path: '/runs/$HOME/data'\nbase_model: 'maia-1900.pb.gz'\n"
        );
    }
}
