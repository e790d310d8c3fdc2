use crate::config::GlobalNames;
use crate::registry::FileFunctions;
use crate::replace::Replacement;

/// A JS string literal for `s`; the same quoting is used at call sites and in
/// registration so ids compare byte for byte.
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

/// Registry setup appended to a module defining server functions.
///
/// ```js
/// ;if (!globalThis.__SERVERFN_REGISTRY__) { globalThis.__SERVERFN_REGISTRY__ = Object.create(null); }
/// globalThis.__SERVERFN_REGISTRY__["getUser@src/api.ts:3"] = getUser;
/// ```
pub fn registration_code(functions: &FileFunctions, globals: &GlobalNames) -> String {
    let registry = globals.registry_ref();
    let mut out = format!(
        "\n;if (!{registry}) {{ {registry} = Object.create(null); }}\n"
    );
    for info in functions.values() {
        let key = js_string(&info.id);
        out.push_str(&format!("{registry}[{key}] = {};\n", info.local_name));
        if info.requires_context {
            out.push_str(&format!(
                "{registry}[{key}].{} = true;\n",
                globals.context_flag
            ));
        }
    }
    out
}

/// Insertion of [`registration_code`] after all existing content.
pub fn registration(source_len: usize, functions: &FileFunctions, globals: &GlobalNames) -> Option<Replacement> {
    if functions.is_empty() {
        return None;
    }
    Some(Replacement::insert(source_len, registration_code(functions, globals)))
}
