//! Language detection, extension allow-list and tree-sitter grammar registry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunker::ChunkKind;

/// Language hint attached to every loaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Bash,
    Toml,
    Json,
    Markdown,
    Text,
}

/// Every extension the loader accepts, grouped by language.
const EXTENSIONS: &[(Lang, &[&str])] = &[
    (Lang::Rust, &["rs"]),
    (Lang::Python, &["py", "pyi"]),
    (Lang::JavaScript, &["js", "jsx", "mjs", "cjs"]),
    (Lang::TypeScript, &["ts", "mts", "cts"]),
    (Lang::Tsx, &["tsx"]),
    (Lang::Go, &["go"]),
    (Lang::Bash, &["sh", "bash", "zsh"]),
    (Lang::Toml, &["toml"]),
    (Lang::Json, &["json", "jsonc"]),
    (Lang::Markdown, &["md", "markdown"]),
    (Lang::Text, &["txt", "text", "rst"]),
];

impl Lang {
    /// Identifier used in record metadata and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }

    /// Parse a language identifier as produced by [`Lang::id`].
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        EXTENSIONS
            .iter()
            .map(|(lang, _)| *lang)
            .find(|lang| lang.id().eq_ignore_ascii_case(id))
    }

    /// Get the tree-sitter grammar. Returns `None` if the language is not
    /// parsed with tree-sitter or the corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Bash => Some(tree_sitter_bash::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Toml => Some(tree_sitter_toml_ng::LANGUAGE.into()),
            #[cfg(feature = "lang-config")]
            Self::Json => Some(tree_sitter_json::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Map an AST node kind to the chunk kind it produces, if the node is a
    /// definition that gets its own chunk.
    ///
    /// Python `decorated_definition` is resolved by the parser through its
    /// `definition` field and is not listed here.
    #[must_use]
    pub fn unit_kind(self, node_kind: &str) -> Option<ChunkKind> {
        let kind = match (self, node_kind) {
            (
                Self::Rust,
                "struct_item" | "enum_item" | "union_item" | "trait_item" | "impl_item",
            )
            | (Self::Python, "class_definition")
            | (
                Self::JavaScript | Self::TypeScript | Self::Tsx,
                "class_declaration" | "abstract_class_declaration" | "interface_declaration",
            )
            | (Self::Go, "type_declaration") => ChunkKind::Class,
            (Self::Rust, "function_item" | "macro_definition")
            | (Self::Python, "function_definition")
            | (
                Self::JavaScript | Self::TypeScript | Self::Tsx,
                "function_declaration" | "generator_function_declaration" | "method_definition",
            )
            | (Self::Go, "function_declaration" | "method_declaration")
            | (Self::Bash, "function_definition") => ChunkKind::Function,
            (Self::Rust, "mod_item") => ChunkKind::Module,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether a declaration whose single initializer is a `value_kind` node
    /// defines a function, as in `export const handler = async () => {}`.
    #[must_use]
    pub fn is_function_binding(self, declaration_kind: &str, value_kind: &str) -> bool {
        matches!(self, Self::JavaScript | Self::TypeScript | Self::Tsx)
            && matches!(declaration_kind, "lexical_declaration" | "variable_declaration")
            && matches!(
                value_kind,
                "arrow_function" | "function_expression" | "generator_function"
            )
    }

    /// Node kinds that attach to the definition immediately following them.
    #[must_use]
    pub fn is_leading_trivia(self, node_kind: &str) -> bool {
        is_comment_kind(node_kind) || (self == Self::Rust && node_kind == "attribute_item")
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Comment node kinds across the supported grammars (`comment`,
/// `line_comment`, `block_comment`).
#[must_use]
pub fn is_comment_kind(node_kind: &str) -> bool {
    node_kind.contains("comment")
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map(|(lang, _)| *lang)
}

/// The default extension allow-list, without leading dots.
#[must_use]
pub fn default_extensions() -> Vec<String> {
    EXTENSIONS
        .iter()
        .flat_map(|(_, exts)| exts.iter().map(|e| (*e).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_bindings_are_js_only() {
        assert!(Lang::JavaScript.is_function_binding("lexical_declaration", "arrow_function"));
        assert!(Lang::Tsx.is_function_binding("variable_declaration", "function_expression"));
        assert!(!Lang::JavaScript.is_function_binding("lexical_declaration", "number"));
        assert!(!Lang::Rust.is_function_binding("lexical_declaration", "arrow_function"));
    }

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
    }

    #[test]
    fn detect_language_py() {
        assert_eq!(detect_language(Path::new("script.py")), Some(Lang::Python));
    }

    #[test]
    fn detect_language_is_case_insensitive() {
        assert_eq!(detect_language(Path::new("README.MD")), Some(Lang::Markdown));
    }

    #[test]
    fn detect_language_js_variants() {
        for ext in &["js", "jsx", "mjs", "cjs"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Some(Lang::JavaScript),
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_tsx_separate_from_ts() {
        assert_eq!(detect_language(Path::new("a.ts")), Some(Lang::TypeScript));
        assert_eq!(detect_language(Path::new("a.tsx")), Some(Lang::Tsx));
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("file")), None);
        assert_eq!(detect_language(Path::new("image.png")), None);
    }

    #[test]
    fn unit_kinds_for_python() {
        assert_eq!(
            Lang::Python.unit_kind("function_definition"),
            Some(ChunkKind::Function)
        );
        assert_eq!(
            Lang::Python.unit_kind("class_definition"),
            Some(ChunkKind::Class)
        );
        assert_eq!(Lang::Python.unit_kind("expression_statement"), None);
    }

    #[test]
    fn unit_kinds_for_rust() {
        assert_eq!(Lang::Rust.unit_kind("impl_item"), Some(ChunkKind::Class));
        assert_eq!(Lang::Rust.unit_kind("function_item"), Some(ChunkKind::Function));
        assert_eq!(Lang::Rust.unit_kind("mod_item"), Some(ChunkKind::Module));
        assert_eq!(Lang::Rust.unit_kind("use_declaration"), None);
    }

    #[test]
    fn config_languages_have_no_units() {
        assert_eq!(Lang::Toml.unit_kind("table"), None);
        assert_eq!(Lang::Json.unit_kind("object"), None);
    }

    #[test]
    fn rust_attributes_are_leading_trivia() {
        assert!(Lang::Rust.is_leading_trivia("attribute_item"));
        assert!(Lang::Rust.is_leading_trivia("line_comment"));
        assert!(!Lang::Python.is_leading_trivia("attribute_item"));
        assert!(Lang::Python.is_leading_trivia("comment"));
    }

    #[test]
    fn grammar_returns_some_for_enabled_features() {
        #[cfg(feature = "lang-rust")]
        assert!(Lang::Rust.grammar().is_some());
        #[cfg(feature = "lang-python")]
        assert!(Lang::Python.grammar().is_some());
        #[cfg(feature = "lang-js")]
        {
            assert!(Lang::JavaScript.grammar().is_some());
            assert!(Lang::TypeScript.grammar().is_some());
            assert!(Lang::Tsx.grammar().is_some());
        }
        #[cfg(feature = "lang-go")]
        assert!(Lang::Go.grammar().is_some());
        assert!(Lang::Markdown.grammar().is_none());
        assert!(Lang::Text.grammar().is_none());
    }

    #[test]
    fn default_extensions_cover_every_language() {
        let exts = default_extensions();
        for ext in ["rs", "py", "ts", "tsx", "go", "md", "txt", "toml", "json", "sh"] {
            assert!(exts.iter().any(|e| e == ext), "missing .{ext}");
        }
    }

    #[test]
    fn lang_id_roundtrip() {
        for (lang, _) in EXTENSIONS {
            assert_eq!(Lang::from_id(lang.id()), Some(*lang));
            assert_eq!(lang.to_string(), lang.id());
        }
        assert_eq!(Lang::from_id("cobol"), None);
    }
}
