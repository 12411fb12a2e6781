//! Argument block: the argv-style vector the client sends right after
//! `@RSYNCD: OK`, and the checksum-seed prelude that always follows it.
//!
//! The source this protocol is modeled on parses arguments inside a `try`
//! whose `finally` writes the seed and starts muxing regardless of outcome.
//! Re-architected here as three explicit steps: parse (remembering any
//! error), always send the seed and flip to muxed mode, then — only if a
//! parse error was remembered — multiplex it and end the connection.

use crate::error::Result;
use crate::protocol::transport::{read_exact, write_all, Transport};
use rand::Rng;

/// Flags and positional arguments recognized out of the client's argv
/// block. Every other flag is accepted and ignored, not rejected.
#[derive(Debug, Default, Clone)]
pub struct ParsedArgs {
    pub recursive: bool,
    pub src: Option<String>,
    pub dst: Option<String>,
}

/// Read the NUL-terminated sequence of NUL-terminated strings that make up
/// the argv block, stopping at the first empty string.
pub async fn read_argv_block<T: Transport + ?Sized>(transport: &mut T) -> Result<Vec<String>> {
    let mut argv = Vec::new();
    loop {
        let arg = read_nul_terminated(transport).await?;
        if arg.is_empty() {
            break;
        }
        argv.push(arg);
    }
    Ok(argv)
}

async fn read_nul_terminated<T: Transport + ?Sized>(transport: &mut T) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        read_exact(transport, &mut byte).await?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse the argv block, recognizing the flag table in the component
/// design doc. Positional (non-flag) tokens are collected in order as
/// `src` then `dst`.
///
/// An argv block with no positional arguments at all is treated as a
/// parse failure (there is nothing to transfer); every other shape is
/// accepted, since unrecognized flags are ignored rather than rejected.
pub fn parse_args(argv: &[String]) -> std::result::Result<ParsedArgs, String> {
    let mut parsed = ParsedArgs::default();
    let mut positionals = Vec::new();

    for arg in argv {
        match arg.as_str() {
            "--server" | "--sender" | "--dirs" | "-d" | "--times" | "-t" | "--debug" => {}
            "--recursive" | "-r" => parsed.recursive = true,
            flag if flag.starts_with("--rsh") || flag.starts_with("-e") => {}
            other if other.starts_with('-') => {
                // Unrecognized flag: acknowledged, no effect.
            }
            positional => positionals.push(positional.to_owned()),
        }
    }

    if positionals.is_empty() {
        return Err("argv block carried no source/destination arguments".to_owned());
    }

    parsed.src = positionals.first().cloned();
    parsed.dst = positionals.get(1).cloned();
    Ok(parsed)
}

/// Always send the 5-byte seed prelude (`0x00` + 4-byte little-endian
/// random seed), regardless of whether argument parsing succeeded.
///
/// Returns the seed, which feeds the per-connection checksum namespace.
pub async fn send_seed_prelude<T: Transport + ?Sized>(transport: &mut T) -> Result<u32> {
    let seed: u32 = rand::thread_rng().gen();
    let mut frame = [0u8; 5];
    frame[1..5].copy_from_slice(&seed.to_le_bytes());
    write_all(transport, &frame).await?;
    Ok(seed)
}
