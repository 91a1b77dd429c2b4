//! Recovers the signature and n transforms from a player script.
//!
//! The player ships both transforms as ordinary functions buried in a few MB
//! of minified code. Their call sites are stable enough to locate by pattern:
//!
//! ```js
//! h&&(c=Mya(decodeURIComponent(c)))          // signature
//! a.D&&(b=a.get("n"))&&(b=Px[0](b),...)      // n, via a one-element array
//! ```
//!
//! Once a name is known the definition is cut out by brace matching, along
//! with the helper object the signature function calls into and the global
//! lookup table (`'use strict';var Zq="...".split(";")`) newer players index
//! from both functions. Each transform is emitted as a self-contained
//! expression that evaluates to the function.

use regex::Regex;

use crate::error::ResolveError;
use crate::player::AnalysisResult;

/// Turns player source text into transform sources and a timestamp.
pub trait TransformAnalyzer: Send + Sync {
    fn analyze(&self, player_js: &str) -> Result<AnalysisResult, ResolveError>;
}

/// Pattern-based analyzer for the platform's player scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerScriptAnalyzer;

impl TransformAnalyzer for PlayerScriptAnalyzer {
    fn analyze(&self, player_js: &str) -> Result<AnalysisResult, ResolveError> {
        let timestamp = extract_timestamp(player_js)
            .ok_or_else(|| ResolveError::Analysis("signature timestamp not found".to_string()))?;

        let global = find_global_table(player_js);

        let sig_name = find_sig_function_name(player_js)
            .ok_or_else(|| ResolveError::Analysis("signature function not found".to_string()))?;
        let sig_function = extract_function(player_js, &sig_name).ok_or_else(|| {
            ResolveError::Analysis(format!("definition of signature function {} not found", sig_name))
        })?;
        let mut sig_prelude = Vec::new();
        if let Some(helper) = find_helper_name(&sig_function) {
            let object = extract_object(player_js, &helper).ok_or_else(|| {
                ResolveError::Analysis(format!("signature helper object {} not found", helper))
            })?;
            sig_prelude.push(object);
        }

        let n_name = find_n_function_name(player_js)
            .ok_or_else(|| ResolveError::Analysis("n function not found".to_string()))?;
        let n_function = extract_function(player_js, &n_name).ok_or_else(|| {
            ResolveError::Analysis(format!("definition of n function {} not found", n_name))
        })?;
        let n_function = n_function.without_typeof_guard();

        tracing::debug!(
            "Analyzed player: sig={} n={} sts={} global_table={}",
            sig_name,
            n_name,
            timestamp,
            global.as_ref().map(|g| g.name.as_str()).unwrap_or("-")
        );

        Ok(AnalysisResult {
            sig_transform_source: sig_function.into_expression(global.as_ref(), sig_prelude),
            n_transform_source: n_function.into_expression(global.as_ref(), Vec::new()),
            timestamp,
        })
    }
}

/// `var NAME=<value>;` declared right after `'use strict';`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GlobalTable {
    name: String,
    declaration: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct JsFunction {
    name: String,
    params: String,
    /// Body including the outer braces.
    body: String,
}

impl JsFunction {
    /// Drop the `if(typeof X==="undefined")return a;` early exit that makes
    /// the n function a no-op when evaluated outside the full player.
    fn without_typeof_guard(self) -> Self {
        let Ok(guard) = Regex::new(
            r#";\s*if\s*\(\s*typeof\s+[a-zA-Z0-9_$]+\s*===?\s*(?:"undefined"|'undefined'|[a-zA-Z0-9_$]+\[\d+\])\s*\)\s*return\s+[a-zA-Z0-9_$]+;"#,
        ) else {
            return self;
        };
        let body = guard.replace_all(&self.body, ";").into_owned();
        Self { body, ..self }
    }

    fn into_expression(self, global: Option<&GlobalTable>, prelude: Vec<String>) -> String {
        let mut out = String::from("(function () {\n");
        if let Some(global) = global {
            let referenced = self.body.contains(&global.name)
                || prelude.iter().any(|p| p.contains(&global.name));
            if referenced {
                out.push_str(&global.declaration);
                out.push('\n');
            }
        }
        for declaration in prelude {
            out.push_str(&declaration);
            out.push('\n');
        }
        out.push_str(&format!(
            "var {name} = function ({params}) {body};\nreturn {name};\n}})()",
            name = self.name,
            params = self.params,
            body = self.body,
        ));
        out
    }
}

fn extract_timestamp(player_js: &str) -> Option<u64> {
    let re = Regex::new(r#"(?:signatureTimestamp|sts)\s*:\s*(\d+)"#).ok()?;
    re.captures(player_js)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn find_global_table(player_js: &str) -> Option<GlobalTable> {
    let re = Regex::new(r#"['"]use strict['"];\s*var\s+([a-zA-Z0-9_$]+)\s*=\s*"#).ok()?;
    let cap = re.captures(player_js)?;
    let name = cap.get(1)?.as_str().to_string();
    let value_start = cap.get(0)?.end();
    let rest = &player_js[value_start..];

    let value_len = match rest.as_bytes().first()? {
        b'[' => find_closing(rest, 0)? + 1,
        b'"' | b'\'' => {
            // "a;b;c".split(";")
            let literal_end = skip_string(rest.as_bytes(), 0)?;
            let split = Regex::new(r#"^\.split\(\s*(?:"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')\s*\)"#)
                .ok()?;
            literal_end + split.find(&rest[literal_end..])?.end()
        }
        _ => return None,
    };

    Some(GlobalTable {
        declaration: format!("var {} = {};", name, &rest[..value_len]),
        name,
    })
}

fn find_sig_function_name(player_js: &str) -> Option<String> {
    // c&&(c=Mya(decodeURIComponent(c)))
    let call_site = Regex::new(
        r#"\b[a-zA-Z0-9_$]+&&\([a-zA-Z0-9_$]+=([a-zA-Z0-9_$]{2,})\(decodeURIComponent\([a-zA-Z0-9_$]+\)\)"#,
    )
    .ok()?;
    if let Some(name) = call_site
        .captures(player_js)
        .and_then(|cap| cap.get(1))
    {
        return Some(name.as_str().to_string());
    }

    // Mya=function(a){a=a.split("");...}  /  function Mya(a){a=a.split("");...}
    let definitions = [
        r#"([a-zA-Z0-9_$]+)\s*=\s*function\s*\(\s*([a-zA-Z0-9_$]+)\s*\)\s*\{\s*([a-zA-Z0-9_$]+)\s*=\s*([a-zA-Z0-9_$]+)\.split\(\s*(?:""|'')\s*\)"#,
        r#"function\s+([a-zA-Z0-9_$]+)\s*\(\s*([a-zA-Z0-9_$]+)\s*\)\s*\{\s*([a-zA-Z0-9_$]+)\s*=\s*([a-zA-Z0-9_$]+)\.split\(\s*(?:""|'')\s*\)"#,
    ];
    for pattern in definitions {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        // The regex crate has no backreferences; check `a=a.split` by hand.
        let found = re.captures_iter(player_js).find(|cap| {
            let param = &cap[2];
            &cap[3] == param && &cap[4] == param
        });
        if let Some(cap) = found {
            return Some(cap[1].to_string());
        }
    }

    None
}

fn find_n_function_name(player_js: &str) -> Option<String> {
    let call_sites = [
        // a.D&&(b=a.get("n"))&&(b=Px[0](b),a.set("n",b))
        r#"\.get\("n"\)\)&&\([a-zA-Z0-9_$]+=([a-zA-Z0-9_$]+)(?:\[(\d+)\])?\([a-zA-Z0-9_$]+\)"#,
        // c=String.fromCharCode(110),d=a.get(c))&&(d=Px[0](d)
        r#"[a-zA-Z0-9_$]+=String\.fromCharCode\(110\),[a-zA-Z0-9_$]+=[a-zA-Z0-9_$]+\.get\([a-zA-Z0-9_$]+\)\)&&\([a-zA-Z0-9_$]+=([a-zA-Z0-9_$]+)(?:\[(\d+)\])?\([a-zA-Z0-9_$]+\)"#,
    ];

    for pattern in call_sites {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        let Some(cap) = re.captures(player_js) else {
            continue;
        };
        let name = cap.get(1)?.as_str();
        return match cap.get(2) {
            Some(idx) => resolve_array_element(player_js, name, idx.as_str().parse().ok()?),
            None => Some(name.to_string()),
        };
    }

    None
}

/// `var Px=[Qx];` -> `Qx` for index 0.
fn resolve_array_element(player_js: &str, array: &str, index: usize) -> Option<String> {
    let re = Regex::new(&format!(
        r#"var\s+{}\s*=\s*\[([^\]]*)\]"#,
        regex::escape(array)
    ))
    .ok()?;
    let items = re.captures(player_js)?.get(1)?.as_str();
    items
        .split(',')
        .nth(index)
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

/// Name of the object whose methods the signature function calls.
fn find_helper_name(function: &JsFunction) -> Option<String> {
    let re = Regex::new(
        r#"[;,{]\s*([a-zA-Z0-9_$]{2,})(?:\.[a-zA-Z0-9_$]+|\[[^\]]+\])\("#,
    )
    .ok()?;
    re.captures_iter(&function.body)
        .map(|cap| cap[1].to_string())
        .find(|name| name != function.params.trim())
}

fn extract_function(player_js: &str, name: &str) -> Option<JsFunction> {
    let name_re = regex::escape(name);
    let re = Regex::new(&format!(
        r#"(?:function\s+{name}|[{{;,\s]{name}\s*=\s*function|(?:var|let|const)\s+{name}\s*=\s*function)\s*\(([^)]*)\)\s*\{{"#,
        name = name_re
    ))
    .ok()?;

    let cap = re.captures(player_js)?;
    let open = cap.get(0)?.end() - 1;
    let close = find_closing(player_js, open)?;

    Some(JsFunction {
        name: name.to_string(),
        params: cap.get(1)?.as_str().to_string(),
        body: player_js[open..=close].to_string(),
    })
}

/// `var Tx={...};` for the signature helper object.
fn extract_object(player_js: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r#"(?:var\s+|[;,\s]){}\s*=\s*\{{"#,
        regex::escape(name)
    ))
    .ok()?;
    let open = re.find(player_js)?.end() - 1;
    let close = find_closing(player_js, open)?;
    Some(format!("var {} = {};", name, &player_js[open..=close]))
}

/// Index of the bracket closing the one at `open`, skipping string literals
/// and comments.
fn find_closing(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let (open_ch, close_ch) = match bytes.get(open)? {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        b'(' => (b'(', b')'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map(|p| i + p)
                    .unwrap_or(bytes.len());
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = src[i + 2..].find("*/").map(|p| i + 2 + p + 2)?;
                continue;
            }
            c if c == open_ch => depth += 1,
            c if c == close_ch => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index just past the string literal starting at `start`.
fn skip_string(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = *bytes.get(start)?;
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}
