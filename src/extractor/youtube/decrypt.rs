use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Signature scrambling is a short list of known string operations whose
/// order and arguments are read out of the player script.
#[derive(Debug, Clone, Copy, PartialEq)]
enum OpKind {
    Reverse,
    Swap,
    Splice,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Op {
    kind: OpKind,
    arg: usize,
}

/// Decrypts protected stream signatures. The operation table is scraped
/// from the upstream player script and cached by its version id.
pub(crate) struct Decryptor {
    version_id: String,
    ops: Vec<Op>,
}

impl Decryptor {
    pub fn new() -> Self {
        Self {
            version_id: String::new(),
            ops: Vec::new(),
        }
    }

    pub async fn decrypt(&mut self, http: &reqwest::Client, input: &str) -> Result<String> {
        self.update(http).await?;
        apply(&self.ops, input)
    }

    /// Refreshes the operation table when the player script version moved.
    async fn update(&mut self, http: &reqwest::Client) -> Result<()> {
        let body = http
            .get("https://www.youtube.com")
            .send()
            .await?
            .text()
            .await?;
        let path = player_js_path(&body)?;
        let version = path
            .strip_prefix("/s/player/")
            .and_then(|rest| rest.split('/').next())
            .ok_or(Error::DecryptorBroken)?
            .to_string();
        if version == self.version_id {
            return Ok(());
        }

        let base_js = http
            .get(format!("https://www.youtube.com{path}"))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        self.ops = parse_ops(&base_js)?;
        self.version_id = version;
        log::debug!("signature decryptor updated to player version {}", self.version_id);
        Ok(())
    }
}

fn apply(ops: &[Op], input: &str) -> Result<String> {
    let mut sig: Vec<u8> = input.bytes().collect();
    for op in ops {
        if sig.is_empty() {
            return Err(Error::DecryptorBroken);
        }
        match op.kind {
            OpKind::Reverse => sig.reverse(),
            OpKind::Swap => {
                let j = op.arg % sig.len();
                sig.swap(0, j);
            }
            OpKind::Splice => {
                sig.drain(..op.arg.min(sig.len()));
            }
        }
    }
    String::from_utf8(sig).map_err(|_| Error::DecryptorBroken)
}

/// The player script path out of the home page config blob.
fn player_js_path(body: &str) -> Result<String> {
    let marker = "\"PLAYER_JS_URL\":\"";
    let start = body.find(marker).ok_or(Error::DecryptorBroken)? + marker.len();
    let rest = &body[start..];
    let end = rest.find('"').ok_or(Error::DecryptorBroken)?;
    Ok(rest[..end].to_string())
}

fn decrypt_fn_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[a-zA-Z]*&&\([a-zA-Z]*=([a-zA-Z]*)\(decodeURIComponent\([a-zA-Z]*\)\),[a-zA-Z]*\.set\([a-zA-Z]*,encodeURIComponent\([a-zA-Z]*\)\)\)",
        )
        .expect("decrypt function pattern compiles")
    })
}

/// The body of the scrambling function: the statement list between the
/// split("") preamble and the join("") epilogue.
fn decrypt_fn_body(base_js: &str) -> Result<&str> {
    let caps = decrypt_fn_name_re()
        .captures(base_js)
        .ok_or(Error::DecryptorBroken)?;
    let name = caps.get(1).map(|m| m.as_str()).ok_or(Error::DecryptorBroken)?;

    let start_marker = format!("{name}=function(a){{a=a.split(\"\");");
    let end_marker = ";return a.join(\"\")};";
    let start = base_js
        .find(&start_marker)
        .ok_or(Error::DecryptorBroken)?
        + start_marker.len();
    let rest = &base_js[start..];
    let end = rest.find(end_marker).ok_or(Error::DecryptorBroken)?;
    Ok(&rest[..end])
}

fn parse_ops(base_js: &str) -> Result<Vec<Op>> {
    let body = decrypt_fn_body(base_js)?;
    let (obj_name, _) = body.split_once('.').ok_or(Error::DecryptorBroken)?;

    // The operation object holds three one-line helper functions.
    let table_src = {
        let start_marker = format!("var {obj_name}={{");
        let start = base_js
            .find(&start_marker)
            .ok_or(Error::DecryptorBroken)?
            + start_marker.len();
        let rest = &base_js[start..];
        let end = rest.find("};").ok_or(Error::DecryptorBroken)?;
        &rest[..end]
    };

    let lines: Vec<&str> = table_src.split('\n').collect();
    if lines.len() != 3 {
        return Err(Error::DecryptorBroken);
    }
    let mut table: HashMap<&str, OpKind> = HashMap::new();
    for line in lines {
        let (name, fn_src) = line.split_once(':').ok_or(Error::DecryptorBroken)?;
        if fn_src.starts_with("function(a){a.reverse()}") {
            table.insert(name, OpKind::Reverse);
        } else if fn_src
            .starts_with("function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c}")
        {
            table.insert(name, OpKind::Swap);
        } else if fn_src.starts_with("function(a,b){a.splice(0,b)}") {
            table.insert(name, OpKind::Splice);
        }
    }

    let mut ops = Vec::new();
    for call in body.split(';') {
        let (_, call) = call.split_once('.').ok_or(Error::DecryptorBroken)?;
        let (name, args) = call.split_once('(').ok_or(Error::DecryptorBroken)?;
        let arg = args
            .strip_prefix("a,")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or(Error::DecryptorBroken)?
            .parse::<usize>()
            .map_err(|_| Error::DecryptorBroken)?;
        let kind = *table.get(name).ok_or(Error::DecryptorBroken)?;
        ops.push(Op { kind, arg });
    }
    Ok(ops)
}
