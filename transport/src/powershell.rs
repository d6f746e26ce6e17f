use base64ct::{Base64, Encoding};
use thiserror::Error;

pub const POWERSHELL: &str = "powershell.exe";

/// Run once per SSH connection; exit status 0 means the remote shell can
/// start PowerShell.
pub const POWERSHELL_PROBE: &str = "powershell.exe -NoProfile -NonInteractive -ExecutionPolicy Bypass -Command \"Write-Host 'PowerShell is available'\"";

const FLAGS: [&str; 5] = [
    "-NoProfile",
    "-NonInteractive",
    "-ExecutionPolicy",
    "Bypass",
    "-EncodedCommand",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("PowerShell script cannot be empty")]
    Empty,
}

/// Encodes `script` the way `-EncodedCommand` expects it: UTF-16LE, then
/// standard base64 with padding.
pub fn encode_script(script: &str) -> Result<String, ScriptError> {
    if script.is_empty() {
        return Err(ScriptError::Empty);
    }
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    Ok(Base64::encode_string(&bytes))
}

/// Arguments after the interpreter name.
pub fn encoded_args(script: &str) -> Result<Vec<String>, ScriptError> {
    let encoded = encode_script(script)?;
    Ok(FLAGS
        .iter()
        .map(|flag| flag.to_string())
        .chain(std::iter::once(encoded))
        .collect())
}

/// The full command line, for shells that take a single string.
pub fn encoded_invocation(interpreter: &str, script: &str) -> Result<String, ScriptError> {
    let args = encoded_args(script)?;
    Ok(format!("{interpreter} {}", args.join(" ")))
}
