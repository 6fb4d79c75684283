//! JSON output for CLI commands
//!
//! One JSON object per line on stdout, UTF-8.

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    write_to(&mut stdout, data)
}

fn write_to<W: Write>(writer: &mut W, data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });
    serde_json::to_writer(&mut *writer, &response)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
