//! Disassemble command - print the demo program's opcode heap

use anyhow::Result;
use trellis_runtime::Environment;

use crate::demo;

pub fn run() -> Result<()> {
    let demo = demo::build(&Environment::new())?;
    print!("{}", demo.program.disassemble());
    Ok(())
}
