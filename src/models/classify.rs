//! Model kind inference for cache artifacts
//!
//! Kinds are never declared on disk, so they are inferred from an ordered
//! list of rules. Each rule inspects the evidence gathered for one artifact
//! and either returns a verdict or passes. The first verdict wins; new rules
//! are appended without disturbing earlier ones.

use super::metadata::ModelMetadata;
use serde::{Deserialize, Serialize};

/// Inferred kind of a cache artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Embedding,
    Generative,
    Unknown,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Generative => write!(f, "generative"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Descriptor files only sentence-embedding exports ship
pub const SENTENCE_EMBEDDING_FILES: &[&str] = &[
    "config_sentence_transformers.json",
    "sentence_bert_config.json",
    "modules.json",
];

pub const TOKENIZER_FILES: &[&str] = &[
    "tokenizer.json",
    "tokenizer_config.json",
    "tokenizer.model",
    "vocab.json",
    "merges.txt",
    "special_tokens_map.json",
];

/// Architecture / model-type keywords, matched as lowercase substrings in order.
/// Head markers come before family names so `T5EncoderModel` is not read as a
/// generative T5.
const ARCHITECTURE_KEYWORDS: &[(&str, ArtifactKind)] = &[
    ("forcausallm", ArtifactKind::Generative),
    ("forconditionalgeneration", ArtifactKind::Generative),
    ("lmheadmodel", ArtifactKind::Generative),
    ("encodermodel", ArtifactKind::Embedding),
    ("forsentenceembedding", ArtifactKind::Embedding),
    ("bert", ArtifactKind::Embedding),
    ("mpnet", ArtifactKind::Embedding),
    ("electra", ArtifactKind::Embedding),
    ("llama", ArtifactKind::Generative),
    ("mistral", ArtifactKind::Generative),
    ("mixtral", ArtifactKind::Generative),
    ("qwen", ArtifactKind::Generative),
    ("gpt", ArtifactKind::Generative),
    ("gemma", ArtifactKind::Generative),
    ("phi", ArtifactKind::Generative),
    ("falcon", ArtifactKind::Generative),
    ("bloom", ArtifactKind::Generative),
    ("t5", ArtifactKind::Generative),
];

const EMBEDDING_NAME_KEYWORDS: &[&str] = &[
    "embedding",
    "embed",
    "encoder",
    "sentence",
    "e5",
    "bge",
    "gte",
    "minilm",
    "mpnet",
    "retriev",
];

const GENERATIVE_NAME_KEYWORDS: &[&str] = &[
    "instruct", "chat", "gpt", "llama", "mistral", "qwen", "gemma", "phi", "coder", "dialo",
];

/// Keywords that mark a packed single-file model as an embedding model
const PACKED_EMBEDDING_KEYWORDS: &[&str] = &["embedding", "embed", "encoder"];

/// Everything the rules may look at for one directory artifact
#[derive(Debug, Clone, Copy)]
pub struct DirectoryEvidence<'a> {
    pub dir_name: &'a str,
    /// Base names of all constituent files
    pub file_names: &'a [String],
    pub metadata: Option<&'a ModelMetadata>,
}

impl DirectoryEvidence<'_> {
    fn has_any_file(&self, wanted: &[&str]) -> bool {
        self.file_names.iter().any(|f| wanted.contains(&f.as_str()))
    }
}

/// One classification rule: a named predicate that may return a verdict
pub struct KindRule {
    pub name: &'static str,
    pub verdict: fn(&DirectoryEvidence<'_>) -> Option<ArtifactKind>,
}

/// Directory classification rules, in priority order
pub const DIRECTORY_RULES: &[KindRule] = &[
    KindRule {
        name: "sentence-embedding-descriptor",
        verdict: sentence_descriptor_rule,
    },
    KindRule {
        name: "config-architecture",
        verdict: config_architecture_rule,
    },
    KindRule {
        name: "config-model-type",
        verdict: config_model_type_rule,
    },
    KindRule {
        name: "tokenizer-present",
        verdict: tokenizer_rule,
    },
    KindRule {
        name: "directory-name",
        verdict: directory_name_rule,
    },
];

fn sentence_descriptor_rule(ev: &DirectoryEvidence<'_>) -> Option<ArtifactKind> {
    ev.has_any_file(SENTENCE_EMBEDDING_FILES).then_some(ArtifactKind::Embedding)
}

fn config_architecture_rule(ev: &DirectoryEvidence<'_>) -> Option<ArtifactKind> {
    ev.metadata
        .and_then(|m| m.architecture.as_deref())
        .and_then(match_architecture)
}

fn config_model_type_rule(ev: &DirectoryEvidence<'_>) -> Option<ArtifactKind> {
    ev.metadata
        .and_then(|m| m.model_type.as_deref())
        .and_then(match_architecture)
}

// Embedding exports in this cache are expected to ship without a tokenizer
fn tokenizer_rule(ev: &DirectoryEvidence<'_>) -> Option<ArtifactKind> {
    ev.has_any_file(TOKENIZER_FILES).then_some(ArtifactKind::Generative)
}

fn directory_name_rule(ev: &DirectoryEvidence<'_>) -> Option<ArtifactKind> {
    match_name(ev.dir_name)
}

fn match_architecture(value: &str) -> Option<ArtifactKind> {
    let value = value.to_lowercase();
    ARCHITECTURE_KEYWORDS
        .iter()
        .find(|(keyword, _)| value.contains(keyword))
        .map(|(_, kind)| *kind)
}

fn match_name(name: &str) -> Option<ArtifactKind> {
    let name = name.to_lowercase();
    if EMBEDDING_NAME_KEYWORDS.iter().any(|k| name.contains(k)) {
        Some(ArtifactKind::Embedding)
    } else if GENERATIVE_NAME_KEYWORDS.iter().any(|k| name.contains(k)) {
        Some(ArtifactKind::Generative)
    } else {
        None
    }
}

/// Classify a directory artifact, returning the kind and the deciding rule
pub fn classify_directory_kind(
    evidence: &DirectoryEvidence<'_>,
) -> (ArtifactKind, Option<&'static str>) {
    for rule in DIRECTORY_RULES {
        if let Some(kind) = (rule.verdict)(evidence) {
            return (kind, Some(rule.name));
        }
    }
    (ArtifactKind::Unknown, None)
}

/// Classify a packed single-file model from its file name
pub fn classify_packed_kind(file_name: &str) -> ArtifactKind {
    let name = file_name.to_lowercase();
    if PACKED_EMBEDDING_KEYWORDS.iter().any(|k| name.contains(k)) {
        ArtifactKind::Embedding
    } else {
        ArtifactKind::Generative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn metadata(architecture: Option<&str>, model_type: Option<&str>) -> ModelMetadata {
        ModelMetadata {
            architecture: architecture.map(String::from),
            model_type: model_type.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_sentence_descriptor_wins_over_everything() {
        let names = files(&["config.json", "config_sentence_transformers.json", "tokenizer.json"]);
        let meta = metadata(Some("LlamaForCausalLM"), None);
        let ev = DirectoryEvidence {
            dir_name: "models--org--chat",
            file_names: &names,
            metadata: Some(&meta),
        };
        assert_eq!(
            classify_directory_kind(&ev),
            (ArtifactKind::Embedding, Some("sentence-embedding-descriptor"))
        );
    }

    #[test]
    fn test_architecture_causal_lm() {
        let names = files(&["config.json", "model.safetensors", "tokenizer.json"]);
        let meta = metadata(Some("Qwen2ForCausalLM"), Some("qwen2"));
        let ev = DirectoryEvidence {
            dir_name: "models--Qwen--Qwen2.5-7B-Instruct",
            file_names: &names,
            metadata: Some(&meta),
        };
        assert_eq!(
            classify_directory_kind(&ev),
            (ArtifactKind::Generative, Some("config-architecture"))
        );
    }

    #[test]
    fn test_architecture_encoder_models() {
        assert_eq!(match_architecture("XLMRobertaModel"), Some(ArtifactKind::Embedding));
        assert_eq!(match_architecture("T5EncoderModel"), Some(ArtifactKind::Embedding));
        assert_eq!(
            match_architecture("T5ForConditionalGeneration"),
            Some(ArtifactKind::Generative)
        );
        assert_eq!(match_architecture("SomethingElse"), None);
    }

    #[test]
    fn test_model_type_used_when_architecture_missing() {
        let names = files(&["config.json", "model.safetensors", "tokenizer.json"]);
        let meta = metadata(None, Some("xlm-roberta"));
        let ev = DirectoryEvidence {
            dir_name: "models--org--thing",
            file_names: &names,
            metadata: Some(&meta),
        };
        assert_eq!(
            classify_directory_kind(&ev),
            (ArtifactKind::Embedding, Some("config-model-type"))
        );
    }

    #[test]
    fn test_tokenizer_means_generative() {
        let names = files(&["config.json", "model.safetensors", "tokenizer.model"]);
        let ev = DirectoryEvidence {
            dir_name: "models--org--thing",
            file_names: &names,
            metadata: Some(&ModelMetadata::default()),
        };
        assert_eq!(
            classify_directory_kind(&ev),
            (ArtifactKind::Generative, Some("tokenizer-present"))
        );
    }

    #[test]
    fn test_directory_name_fallback() {
        let names = files(&["config.json", "model.safetensors"]);
        let ev = DirectoryEvidence {
            dir_name: "models--BAAI--bge-small-en-v1.5",
            file_names: &names,
            metadata: None,
        };
        assert_eq!(
            classify_directory_kind(&ev),
            (ArtifactKind::Embedding, Some("directory-name"))
        );
    }

    #[test]
    fn test_unknown_when_nothing_matches() {
        let names = files(&["config.json", "weights.bin"]);
        let ev = DirectoryEvidence {
            dir_name: "models--acme--widget",
            file_names: &names,
            metadata: None,
        };
        assert_eq!(classify_directory_kind(&ev), (ArtifactKind::Unknown, None));
    }

    #[test]
    fn test_packed_kind() {
        assert_eq!(
            classify_packed_kind("nomic-embed-text-v1.5.Q8_0.gguf"),
            ArtifactKind::Embedding
        );
        assert_eq!(
            classify_packed_kind("mistral-7b-instruct.Q4_K_M.gguf"),
            ArtifactKind::Generative
        );
    }

    #[test]
    fn test_name_keyword_sets_are_disjoint() {
        for k in EMBEDDING_NAME_KEYWORDS {
            assert!(!GENERATIVE_NAME_KEYWORDS.contains(k));
        }
    }
}
