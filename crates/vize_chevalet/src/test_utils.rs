//! Test helpers: a tiny block-splitting compiler.

use std::sync::atomic::{AtomicUsize, Ordering};

use vize_carton::{normalize_path, FxHashMap};

use crate::compiler::{CompileOptions, ParseOptions, SfcCompiler};
use crate::types::{
    BlockLocation, CompiledBlock, CompiledMain, SfcBlock, SfcCustomBlock, SfcDescriptor, SfcError,
    SfcStyleBlock,
};

/// Splits top-level blocks and emits their content as trivially "compiled" modules.
#[derive(Debug, Default)]
pub(crate) struct FixtureCompiler {
    parses: AtomicUsize,
    main_compiles: AtomicUsize,
}

impl FixtureCompiler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    pub(crate) fn main_compile_count(&self) -> usize {
        self.main_compiles.load(Ordering::SeqCst)
    }
}

impl SfcCompiler for FixtureCompiler {
    fn parse(
        &self,
        source: &str,
        filename: &str,
        _options: &ParseOptions,
    ) -> Result<SfcDescriptor, SfcError> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        split_blocks(source, filename)
    }

    fn compile_main(
        &self,
        descriptor: &SfcDescriptor,
        options: &CompileOptions,
    ) -> Result<CompiledMain, SfcError> {
        self.main_compiles.fetch_add(1, Ordering::SeqCst);
        let script = descriptor
            .script
            .as_ref()
            .map(|s| s.content.as_str())
            .unwrap_or_default();
        let template = descriptor
            .template
            .as_ref()
            .map(|t| t.content.as_str())
            .unwrap_or_default();
        if template.contains("v-error") {
            return Err(SfcError::new("unknown directive v-error").with_code("X_V_ERROR"));
        }

        Ok(CompiledMain {
            code: format!(
                "const _script = {};\nconst _template = {};\nexport default {{ _script, _template }}",
                js_string(script),
                js_string(template)
            ),
            map: options
                .source_map
                .then(|| serde_json::json!({ "version": 3, "sources": [descriptor.filename], "mappings": "" })),
            dependencies: type_dependencies(&descriptor.filename, script),
        })
    }

    fn compile_script(
        &self,
        descriptor: &SfcDescriptor,
        _options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError> {
        descriptor
            .script
            .as_ref()
            .map(|s| CompiledBlock::new(s.content.clone()))
            .ok_or_else(|| SfcError::new("no script"))
    }

    fn compile_template(
        &self,
        descriptor: &SfcDescriptor,
        _options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError> {
        descriptor
            .template
            .as_ref()
            .map(|t| {
                CompiledBlock::new(format!(
                    "export function render() {{ return {} }}",
                    js_string(&t.content)
                ))
            })
            .ok_or_else(|| SfcError::new("no template"))
    }

    fn compile_style(
        &self,
        descriptor: &SfcDescriptor,
        index: usize,
        options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError> {
        let style = descriptor
            .style(index)
            .ok_or_else(|| SfcError::new(format!("no style {}", index)))?;
        let code = if style.scoped {
            format!("/* data-v-{} */\n{}", options.id, style.content)
        } else {
            style.content.clone()
        };
        Ok(CompiledBlock {
            code,
            map: options
                .source_map
                .then(|| serde_json::json!({ "version": 3, "mappings": "" })),
        })
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// `import type { X } from './x'` lines resolved against the component directory.
fn type_dependencies(filename: &str, script: &str) -> Vec<String> {
    let dir = filename.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    script
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("import type"))
        .filter_map(|line| {
            let from = line.rfind("from")?;
            let specifier = line[from + 4..]
                .trim()
                .trim_end_matches(';')
                .trim_matches(|c: char| c == '\'' || c == '"');
            if !specifier.starts_with('.') {
                return None;
            }
            let mut path = normalize_path(&format!("{}/{}", dir, specifier));
            if !path.rsplit('/').next().unwrap_or("").contains('.') {
                path.push_str(".ts");
            }
            Some(path)
        })
        .collect()
}

fn location(source: &str, offset: usize) -> BlockLocation {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = offset - before.rfind('\n').map(|p| p + 1).unwrap_or(0) + 1;
    BlockLocation {
        start: offset,
        end: offset,
        start_line: line,
        start_column: column,
        end_line: line,
        end_column: column,
    }
}

fn parse_attrs(text: &str) -> FxHashMap<String, String> {
    text.split_whitespace()
        .map(|attr| match attr.split_once('=') {
            Some((name, value)) => (
                name.to_string(),
                value.trim_matches(|c: char| c == '"' || c == '\'').to_string(),
            ),
            None => (attr.to_string(), String::new()),
        })
        .collect()
}

fn split_blocks(source: &str, filename: &str) -> Result<SfcDescriptor, SfcError> {
    let mut descriptor = SfcDescriptor::new(filename, source);
    let mut pos = 0;

    while let Some(rel) = source[pos..].find('<') {
        let start = pos + rel;
        let rest = &source[start + 1..];
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(rest.len());
        if name_len == 0 {
            pos = start + 1;
            continue;
        }
        let name = &rest[..name_len];
        let open_end = rest.find('>').ok_or_else(|| {
            SfcError::new(format!("unclosed <{}> tag", name))
                .with_code("EOF_IN_TAG")
                .at(location(source, start))
        })?;
        let self_closing = rest[..open_end].ends_with('/');
        let attrs = parse_attrs(rest[name_len..open_end].trim_end_matches('/'));
        let content_start = start + 1 + open_end + 1;

        let (content, next) = if self_closing {
            (String::new(), content_start)
        } else {
            let close = format!("</{}>", name);
            let close_rel = source[content_start..].find(&close).ok_or_else(|| {
                SfcError::new(format!("Element <{}> is missing end tag", name))
                    .with_code("MISSING_END_TAG")
                    .at(location(source, start))
            })?;
            (
                source[content_start..content_start + close_rel].to_string(),
                content_start + close_rel + close.len(),
            )
        };
        let loc = location(source, content_start);
        let lang = attrs.get("lang").cloned();
        let src = attrs.get("src").cloned();

        match name {
            "template" => {
                descriptor.template = Some(SfcBlock {
                    content,
                    loc,
                    lang,
                    src,
                    attrs,
                });
            }
            "script" => match descriptor.script.as_mut() {
                Some(existing) => {
                    existing.content.push('\n');
                    existing.content.push_str(&content);
                }
                None => {
                    descriptor.script = Some(SfcBlock {
                        content,
                        loc,
                        lang,
                        src,
                        attrs,
                    });
                }
            },
            "style" => {
                descriptor.styles.push(SfcStyleBlock {
                    content,
                    loc,
                    lang,
                    src,
                    scoped: attrs.contains_key("scoped"),
                    module: attrs.get("module").cloned(),
                    attrs,
                });
            }
            other => {
                descriptor.custom_blocks.push(SfcCustomBlock {
                    block_type: other.to_string(),
                    content,
                    loc,
                    lang,
                    src,
                    attrs,
                });
            }
        }
        pos = next;
    }

    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_blocks() {
        let source = "<script setup lang=\"ts\">import type { Props } from './types'\nlet x = 1</script>\n<template><div>{{ x }}</div></template>\n<style scoped>.a {}</style>\n<i18n lang=\"json\">{}</i18n>\n";
        let descriptor = split_blocks(source, "/src/A.vue").unwrap();

        assert_eq!(descriptor.script.as_ref().unwrap().lang.as_deref(), Some("ts"));
        assert_eq!(descriptor.template.as_ref().unwrap().content, "<div>{{ x }}</div>");
        assert!(descriptor.styles[0].scoped);
        assert_eq!(descriptor.custom_blocks[0].block_type, "i18n");
        assert_eq!(
            type_dependencies("/src/A.vue", &descriptor.script.as_ref().unwrap().content),
            vec!["/src/types.ts".to_string()]
        );
    }

    #[test]
    fn test_missing_end_tag_has_position() {
        let error = split_blocks("\n\n  <template><div>", "/src/A.vue").unwrap_err();
        let loc = error.loc.unwrap();
        assert_eq!((loc.start_line, loc.start_column), (3, 3));
    }
}
