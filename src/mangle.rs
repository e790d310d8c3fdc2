//! Bundle-level renaming of the runtime globals in production chunks.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use regex::Regex;

use crate::config::GlobalNames;
use crate::error::Result;
use crate::replace::{apply, Applied, MapSource, Replacement};

/// Suffix shared by every renamed global of one build.
pub fn build_salt(configured: Option<&str>) -> String {
    if let Some(salt) = configured {
        return salt.to_string();
    }
    // identifier-safe: URL_SAFE only adds '-' and '_'
    URL_SAFE_NO_PAD
        .encode(rand::random::<[u8; 9]>())
        .replace('-', "$")
}

pub fn salted(name: &str, salt: &str) -> String {
    format!("{name}_{salt}")
}

/// Renames every whole-word occurrence of the dispatch, registry and context
/// flag names in `code`.
pub fn rename_globals(
    code: &str,
    chunk_name: &str,
    globals: &GlobalNames,
    salt: &str,
    source_maps: bool,
) -> Result<Applied> {
    let names = [&globals.dispatch, &globals.registry, &globals.context_flag];
    let alternatives: Vec<String> = names.iter().map(|n| regex::escape(n)).collect();
    let re = Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|")))?;

    let replacements: Vec<Replacement> = re
        .find_iter(code)
        .map(|m| Replacement::new(m.start(), m.end(), salted(m.as_str(), salt)))
        .collect();
    if replacements.is_empty() {
        return Ok(Applied::Unchanged);
    }
    let map_source = source_maps.then(|| MapSource::new(chunk_name, code));
    apply(code, replacements, map_source.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_whole_words_only() {
        let code = "globalThis.__SERVERFN_CALL__(\"a\", []);\n\
                    globalThis.__SERVERFN_REGISTRY__[\"a\"].__serverfnContext = true;\n\
                    const x__SERVERFN_CALL__y = 1;\n";
        let out = rename_globals(code, "index.js", &GlobalNames::default(), "s1", false)
            .unwrap()
            .into_output()
            .unwrap();
        assert_eq!(
            out.code,
            "globalThis.__SERVERFN_CALL___s1(\"a\", []);\n\
             globalThis.__SERVERFN_REGISTRY___s1[\"a\"].__serverfnContext_s1 = true;\n\
             const x__SERVERFN_CALL__y = 1;\n"
        );
        assert!(out.map.is_none());
    }

    #[test]
    fn chunks_without_globals_are_untouched() {
        let out = rename_globals("console.log(1);", "a.js", &GlobalNames::default(), "s", true).unwrap();
        assert_eq!(out, Applied::Unchanged);
    }

    #[test]
    fn salt_is_an_identifier_fragment() {
        assert_eq!(build_salt(Some("fixed")), "fixed");
        let salt = build_salt(None);
        assert_eq!(salt.len(), 12);
        assert!(salt.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'));
        assert_ne!(build_salt(None), build_salt(None));
    }
}
