use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MEMORY_GB: u32 = 8;
pub const DEFAULT_STORAGE_GB: u32 = 256;

const YEAR_RANGE: std::ops::RangeInclusive<u32> = 1990..=2035;

pub const JUNK_KEYWORDS: &[&str] = &[
    "на запчасти",
    "запчаст",
    "разбит",
    "не работает",
    "не включается",
    "неисправ",
    "залит",
    "после воды",
    "блок icloud",
    "icloud lock",
    "заблокирован",
    "activation lock",
    "mdm",
    "предзаказ",
    "под заказ",
    "копия",
    "реплика",
    "коробка от",
    "чехол для",
    "зарядка для",
    "parts",
    "broken",
    "damaged",
    "cracked",
    "locked",
    "pre-order",
    "preorder",
    "replica",
];

/// Model families, most specific first. The first match wins, so a chip
/// variant must precede the plain chip of the same size.
const CATALOG: &[(&str, &str, &str)] = &[
    (r"macbook\s*pro\s*16.*\bm4\s*max", "MacBook Pro 16 (2024, M4 Max)", "Apple M4 Max"),
    (r"macbook\s*pro\s*16.*\bm4\s*pro", "MacBook Pro 16 (2024, M4 Pro)", "Apple M4 Pro"),
    (r"macbook\s*pro\s*16.*\bm4", "MacBook Pro 16 (2024, M4 Pro)", "Apple M4 Pro"),
    (r"macbook\s*pro\s*14.*\bm4\s*max", "MacBook Pro 14 (2024, M4 Max)", "Apple M4 Max"),
    (r"macbook\s*pro\s*14.*\bm4\s*pro", "MacBook Pro 14 (2024, M4 Pro)", "Apple M4 Pro"),
    (r"macbook\s*pro\s*14.*\bm4", "MacBook Pro 14 (2024, M4)", "Apple M4"),
    (r"macbook\s*pro\s*16.*\bm3\s*max", "MacBook Pro 16 (2023, M3 Max)", "Apple M3 Max"),
    (r"macbook\s*pro\s*16.*\bm3\s*pro", "MacBook Pro 16 (2023, M3 Pro)", "Apple M3 Pro"),
    (r"macbook\s*pro\s*14.*\bm3\s*max", "MacBook Pro 14 (2023, M3 Max)", "Apple M3 Max"),
    (r"macbook\s*pro\s*14.*\bm3\s*pro", "MacBook Pro 14 (2023, M3 Pro)", "Apple M3 Pro"),
    (r"macbook\s*pro\s*14.*\bm3", "MacBook Pro 14 (2023, M3)", "Apple M3"),
    (r"macbook\s*pro\s*16.*\bm2\s*max", "MacBook Pro 16 (2023, M2 Max)", "Apple M2 Max"),
    (r"macbook\s*pro\s*16.*\bm2\s*pro", "MacBook Pro 16 (2023, M2 Pro)", "Apple M2 Pro"),
    (r"macbook\s*pro\s*14.*\bm2\s*max", "MacBook Pro 14 (2023, M2 Max)", "Apple M2 Max"),
    (r"macbook\s*pro\s*14.*\bm2\s*pro", "MacBook Pro 14 (2023, M2 Pro)", "Apple M2 Pro"),
    (r"macbook\s*pro\s*16.*\bm1\s*max", "MacBook Pro 16 (2021, M1 Max)", "Apple M1 Max"),
    (r"macbook\s*pro\s*16.*\bm1\s*pro", "MacBook Pro 16 (2021, M1 Pro)", "Apple M1 Pro"),
    (r"macbook\s*pro\s*14.*\bm1\s*max", "MacBook Pro 14 (2021, M1 Max)", "Apple M1 Max"),
    (r"macbook\s*pro\s*14.*\bm1\s*pro", "MacBook Pro 14 (2021, M1 Pro)", "Apple M1 Pro"),
    (r"macbook\s*pro\s*13.*\bm2", "MacBook Pro 13 (2022, M2)", "Apple M2"),
    (r"macbook\s*pro\s*13.*\bm1", "MacBook Pro 13 (2020, M1)", "Apple M1"),
    (r"macbook\s*air\s*15.*\bm4", "MacBook Air 15 (2025, M4)", "Apple M4"),
    (r"macbook\s*air\s*15.*\bm3", "MacBook Air 15 (2024, M3)", "Apple M3"),
    (r"macbook\s*air\s*15.*\bm2", "MacBook Air 15 (2023, M2)", "Apple M2"),
    (r"macbook\s*air.*\bm4", "MacBook Air 13 (2025, M4)", "Apple M4"),
    (r"macbook\s*air.*\bm3", "MacBook Air 13 (2024, M3)", "Apple M3"),
    (r"macbook\s*air.*\bm2", "MacBook Air 13 (2022, M2)", "Apple M2"),
    (r"macbook\s*air.*\bm1", "MacBook Air 13 (2020, M1)", "Apple M1"),
];

struct ModelPattern {
    re: Regex,
    model_name: &'static str,
    processor: &'static str,
}

static MODELS: LazyLock<Vec<ModelPattern>> = LazyLock::new(|| {
    CATALOG
        .iter()
        .map(|(pat, model_name, processor)| ModelPattern {
            re: Regex::new(pat).expect("catalog regex"),
            model_name,
            processor,
        })
        .collect()
});

static CAPACITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,4})\s*(gb|гб|tb|тб)").expect("capacity regex"));

static SLASH_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3})\s*/\s*(\d{1,4})\s*(gb|гб|tb|тб)?").expect("slash regex")
});

static CYRILLIC_CHIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"м([1-4])").expect("chip regex"));

// whole words only, `\b` is Unicode-aware
static CYRILLIC_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(про|эйр|эир|аир|макс)\b").expect("word regex"));

/// Canonical (model, memory, storage) key for price statistics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpecKey {
    pub model_name: String,
    pub memory_gb: u32,
    pub storage_gb: u32,
}

impl SpecKey {
    pub fn new(model_name: impl Into<String>, memory_gb: u32, storage_gb: u32) -> Self {
        Self {
            model_name: model_name.into(),
            memory_gb,
            storage_gb,
        }
    }
}

impl fmt::Display for SpecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.model_name, self.memory_gb, self.storage_gb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub key: SpecKey,
    pub processor: &'static str,
    /// False when memory fell back to the default.
    pub memory_stated: bool,
    pub storage_stated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unrecognized {
    Junk(&'static str),
    UnknownModel,
}

impl fmt::Display for Unrecognized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unrecognized::Junk(k) => write!(f, "junk keyword {k:?}"),
            Unrecognized::UnknownModel => f.write_str("unknown model"),
        }
    }
}

pub fn classify(title: &str) -> Result<Classified, Unrecognized> {
    let text = normalize(title);
    if let Some(k) = junk_in(&text) {
        return Err(Unrecognized::Junk(k));
    }
    let model = MODELS
        .iter()
        .find(|m| m.re.is_match(&text))
        .ok_or(Unrecognized::UnknownModel)?;

    let (memory, storage) = capacities_in(&text);
    Ok(Classified {
        key: SpecKey::new(
            model.model_name,
            memory.unwrap_or(DEFAULT_MEMORY_GB),
            storage.unwrap_or(DEFAULT_STORAGE_GB),
        ),
        processor: model.processor,
        memory_stated: memory.is_some(),
        storage_stated: storage.is_some(),
    })
}

pub fn junk_keyword(title: &str) -> Option<&'static str> {
    junk_in(&normalize(title))
}

pub fn capacities(title: &str) -> (Option<u32>, Option<u32>) {
    capacities_in(&normalize(title))
}

/// Processor for a canonical model name, e.g. `Apple M3 Pro` for
/// `MacBook Pro 14 (2023, M3 Pro)`.
pub fn processor_for(model_name: &str) -> String {
    if let Some((_, _, processor)) = CATALOG.iter().find(|(_, m, _)| *m == model_name) {
        return processor.to_string();
    }
    model_name
        .rsplit_once(", ")
        .and_then(|(_, chip)| chip.strip_suffix(')'))
        .map(|chip| format!("Apple {chip}"))
        .unwrap_or_default()
}

fn normalize(title: &str) -> String {
    let lower = title.to_lowercase().replace("макбук", "macbook");
    let latin = CYRILLIC_WORD.replace_all(&lower, |c: &regex::Captures| {
        match &c[1] {
            "про" => "pro",
            "макс" => "max",
            _ => "air",
        }
    });
    CYRILLIC_CHIP.replace_all(&latin, "m$1").into_owned()
}

fn junk_in(text: &str) -> Option<&'static str> {
    JUNK_KEYWORDS.iter().copied().find(|k| text.contains(k))
}

fn capacities_in(text: &str) -> (Option<u32>, Option<u32>) {
    let mut tokens: Vec<u32> = CAPACITY
        .captures_iter(text)
        .filter_map(|c| {
            let value: u32 = c[1].parse().ok()?;
            if YEAR_RANGE.contains(&value) {
                return None;
            }
            Some(scale(value, &c[2]))
        })
        .collect();

    if tokens.len() < 2 {
        if let Some((mem, ssd)) = slash_pair(text) {
            return (Some(mem), Some(ssd));
        }
    }
    if tokens.is_empty() {
        return (None, None);
    }

    // A lone storage-sized token is not memory.
    if tokens.len() == 1 && tokens[0] >= 128 {
        return (None, Some(tokens[0]));
    }
    let memory = tokens.remove(0);
    let storage = tokens.first().copied();
    (Some(memory), storage)
}

/// `16/512`, `8/256gb`, `16/1tb`; the second number ≤8 means terabytes.
fn slash_pair(text: &str) -> Option<(u32, u32)> {
    SLASH_PAIR.captures_iter(text).find_map(|c| {
        let mem: u32 = c[1].parse().ok()?;
        let raw: u32 = c[2].parse().ok()?;
        if !(4..=128).contains(&mem) || YEAR_RANGE.contains(&raw) {
            return None;
        }
        let ssd = match c.get(3).map(|u| u.as_str()) {
            Some(unit) => scale(raw, unit),
            None if raw <= 8 => raw * 1024,
            None => raw,
        };
        (ssd >= 128).then_some((mem, ssd))
    })
}

fn scale(value: u32, unit: &str) -> u32 {
    let terabytes = matches!(unit, "tb" | "тб");
    if terabytes && value <= 8 {
        value * 1024
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(title: &str) -> SpecKey {
        classify(title).expect("recognized").key
    }

    #[test]
    fn pro_14_top_chip_with_year() {
        assert_eq!(
            key("MacBook Pro 14 2023 M3 Max 16GB 512GB"),
            SpecKey::new("MacBook Pro 14 (2023, M3 Max)", 16, 512)
        );
    }

    #[test]
    fn no_capacity_tokens_use_defaults() {
        let c = classify("MacBook Air M1 отличное состояние").unwrap();
        assert_eq!(c.key, SpecKey::new("MacBook Air 13 (2020, M1)", 8, 256));
        assert!(!c.memory_stated);
        assert!(!c.storage_stated);
    }

    #[test]
    fn junk_always_unrecognized() {
        assert_eq!(
            classify("MacBook Pro 14 M3 Pro 18GB 512GB parts-only"),
            Err(Unrecognized::Junk("parts"))
        );
        assert_eq!(
            classify("Macbook Air M2 на запчасти"),
            Err(Unrecognized::Junk("на запчасти"))
        );
        assert!(matches!(
            classify("MacBook Pro 16 M1 Max предзаказ"),
            Err(Unrecognized::Junk(_))
        ));
    }

    #[test]
    fn unknown_model() {
        assert_eq!(classify("ThinkPad X1 Carbon 16GB"), Err(Unrecognized::UnknownModel));
        assert_eq!(classify("MacBook Pro 2015 i7"), Err(Unrecognized::UnknownModel));
    }

    #[test]
    fn longer_variant_is_not_shadowed() {
        assert_eq!(key("MacBook Pro 16 M3 Max 36/1tb").model_name, "MacBook Pro 16 (2023, M3 Max)");
        assert_eq!(key("MacBook Pro 14 M3 Pro 18gb").model_name, "MacBook Pro 14 (2023, M3 Pro)");
        assert_eq!(key("MacBook Pro 14 M3 8gb").model_name, "MacBook Pro 14 (2023, M3)");
        assert_eq!(key("MacBook Air 15 M2 8gb").model_name, "MacBook Air 15 (2023, M2)");
        assert_eq!(key("MacBook Air 13 M2 8gb").model_name, "MacBook Air 13 (2022, M2)");
    }

    #[test]
    fn year_token_is_not_capacity() {
        assert_eq!(capacities("macbook air m2 2022гб 8гб 256гб"), (Some(8), Some(256)));
    }

    #[test]
    fn terabytes_expand() {
        assert_eq!(capacities("MacBook Pro 16GB 1TB"), (Some(16), Some(1024)));
        assert_eq!(capacities("MacBook Pro 32 гб 2 тб"), (Some(32), Some(2048)));
    }

    #[test]
    fn slash_pairs() {
        assert_eq!(capacities("MacBook Air M2 8/256"), (Some(8), Some(256)));
        assert_eq!(capacities("MacBook Pro 14 M1 Pro 16/1"), (Some(16), Some(1024)));
        assert_eq!(capacities("MacBook Pro 14 M1 Pro 32/2tb"), (Some(32), Some(2048)));
        assert_eq!(capacities("куплен 12/2023"), (None, None));
    }

    #[test]
    fn lone_storage_token_goes_to_storage() {
        let c = classify("MacBook Air M1 512GB").unwrap();
        assert_eq!(c.key, SpecKey::new("MacBook Air 13 (2020, M1)", 8, 512));
        assert!(!c.memory_stated);
        assert!(c.storage_stated);
    }

    #[test]
    fn cyrillic_spelling() {
        assert_eq!(
            key("Макбук Air М1 8гб 256гб"),
            SpecKey::new("MacBook Air 13 (2020, M1)", 8, 256)
        );
    }

    #[test]
    fn cyrillic_family_words() {
        assert_eq!(
            key("Макбук Про 14 М3 Про 18гб 512гб"),
            SpecKey::new("MacBook Pro 14 (2023, M3 Pro)", 18, 512)
        );
        assert_eq!(key("Макбук Эйр М2 8/256").model_name, "MacBook Air 13 (2022, M2)");
        assert_eq!(key("макбук про 16 м1 макс 32/1tb").model_name, "MacBook Pro 16 (2021, M1 Max)");
        // only whole words are rewritten
        assert_eq!(normalize("MacBook Air M2 проблем нет"), "macbook air m2 проблем нет");
    }

    #[test]
    fn processor_from_model_name() {
        assert_eq!(processor_for("MacBook Pro 14 (2023, M3 Pro)"), "Apple M3 Pro");
        assert_eq!(processor_for("MacBook Pro 13 (2019, Intel i5)"), "Apple Intel i5");
        assert_eq!(processor_for("Something else"), "");
    }
}
