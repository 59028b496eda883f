//! UI and status strings in Chinese and Kazakh.
//!
//! Tables live in `assets/i18n/*.json` and are compiled into the binary.
//! Placeholders are written `{name}`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

const ZH_TABLE: &str = include_str!("../assets/i18n/zh.json");
const KK_TABLE: &str = include_str!("../assets/i18n/kk.json");

/// Interface language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    Zh,
    Kk,
}

impl Lang {
    pub fn code(self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::Kk => "kk",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "cn" => Ok(Lang::Zh),
            "kk" | "kz" | "kk-kz" => Ok(Lang::Kk),
            other => Err(format!("unsupported language '{other}' (expected zh or kk)")),
        }
    }
}

/// The whole table for `lang`.
pub fn table(lang: Lang) -> &'static BTreeMap<String, String> {
    static ZH: OnceLock<BTreeMap<String, String>> = OnceLock::new();
    static KK: OnceLock<BTreeMap<String, String>> = OnceLock::new();
    let (cell, raw) = match lang {
        Lang::Zh => (&ZH, ZH_TABLE),
        Lang::Kk => (&KK, KK_TABLE),
    };
    cell.get_or_init(|| {
        serde_json::from_str(raw).unwrap_or_else(|e| {
            log::error!("Broken {lang} translation table: {e}");
            BTreeMap::new()
        })
    })
}

/// Look a string up; unknown keys come back unchanged.
pub fn t(lang: Lang, key: &str) -> &str {
    match table(lang).get(key) {
        Some(value) => value,
        None => {
            log::warn!("Missing {lang} translation for '{key}'");
            key
        }
    }
}

/// Look a string up and fill its `{name}` placeholders.
pub fn tf(lang: Lang, key: &str, args: &[(&str, &dyn fmt::Display)]) -> String {
    let mut out = t(lang, key).to_string();
    for (name, value) in args {
        out = out.replace(&format!("{{{name}}}"), &value.to_string());
    }
    out
}

/// Shorthand for messages that only mention a voice.
pub fn voice_msg(lang: Lang, key: &str, voice_name: &str) -> String {
    tf(lang, key, &[("voice_name", &voice_name)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_have_the_same_keys() {
        let zh: Vec<_> = table(Lang::Zh).keys().collect();
        let kk: Vec<_> = table(Lang::Kk).keys().collect();
        assert!(!zh.is_empty());
        assert_eq!(zh, kk);
    }

    #[test]
    fn substitutes_voice_name() {
        assert_eq!(
            voice_msg(Lang::Zh, "error_voice_exists", "demo"),
            "[错误] 音色 'demo' 已存在，请使用其他名称"
        );
        assert_eq!(
            voice_msg(Lang::Kk, "success_voice_deleted", "demo"),
            "[Сәтті] 'demo' дауысы жойылды"
        );
    }

    #[test]
    fn multiple_placeholders() {
        let msg = tf(
            Lang::Zh,
            "success_synthesis",
            &[("duration", &"1.50"), ("sample_rate", &44100)],
        );
        assert_eq!(msg, "✅ 合成完成！(时长: 1.50秒, 采样率: 44100 Hz)");
    }

    #[test]
    fn unknown_key_falls_through() {
        assert_eq!(t(Lang::Kk, "no_such_key"), "no_such_key");
    }

    #[test]
    fn parses_language_codes() {
        assert_eq!("KK".parse::<Lang>().unwrap(), Lang::Kk);
        assert_eq!("zh".parse::<Lang>().unwrap(), Lang::Zh);
        assert!("en".parse::<Lang>().is_err());
    }
}
