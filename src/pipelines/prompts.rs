//! 提示词模板：内置默认 + `<prompts.dir>/<name>.txt` 覆盖，`{key}` 占位符替换

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// 取模板（覆盖文件优先）并替换占位符；未提供的占位符原样保留
    pub fn render(&self, name: &str, default: &str, vars: &[(&str, &str)]) -> String {
        let template = self
            .dir
            .as_ref()
            .map(|d| d.join(format!("{name}.txt")))
            .and_then(|path| match std::fs::read_to_string(&path) {
                Ok(text) => {
                    tracing::debug!(prompt = name, path = %path.display(), "prompt override loaded");
                    Some(text)
                }
                Err(_) => None,
            })
            .unwrap_or_else(|| default.to_string());

        vars.iter().fold(template, |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_default_with_vars() {
        let lib = PromptLibrary::default();
        let out = lib.render("x", "Hi {persona}, ask {initial_query} {unknown}", &[
            ("persona", "Sam"),
            ("initial_query", "knives?"),
        ]);
        assert_eq!(out, "Hi Sam, ask knives? {unknown}");
    }

    #[test]
    fn test_override_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("simulator.txt"), "Custom for {persona}").unwrap();
        let lib = PromptLibrary::new(Some(dir.path().to_path_buf()));
        assert_eq!(lib.render("simulator", "default", &[("persona", "Ana")]), "Custom for Ana");
        assert_eq!(lib.render("missing", "default {persona}", &[("persona", "Ana")]), "default Ana");
    }
}
