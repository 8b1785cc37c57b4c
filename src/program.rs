//! Synthetic program parser
//!
//! Turns a process-description text into the descriptor the kernel admits.
//! The format is five header lines, a blank separator, then one instruction
//! per line:
//!
//! ```text
//! name
//! segment id
//! priority            (1 = high, anything else = low)
//! segment size in KB
//! semaphore names, space separated (line may be empty)
//!
//! EXEC 200
//! SEM_P mutex
//! READ 42
//! SEM_V mutex
//! PRINT 15
//! WRITE 42
//! ```
//!
//! Validation of malformed input ends here: the kernel assumes well-formed
//! descriptors, and a semaphore referenced by an instruction but missing
//! from the header is rejected at parse time, not at run time.

use crate::kernel::process::{Instr, Priority};

/// A parsed process descriptor, ready for admission.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: String,
    pub seg_id: u32,
    pub priority: Priority,
    pub seg_size_kb: u32,
    /// Semaphore names declared in the header.
    pub semaphores: Vec<String>,
    pub code: Vec<Instr>,
}

/// Why a program text was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    /// A header line is missing or empty.
    MissingHeader(&'static str),
    /// A numeric header field did not parse.
    InvalidHeader { field: &'static str, value: String },
    /// The blank line between header and code is missing.
    MissingSeparator,
    /// The program has no instructions.
    EmptyCode,
    /// An instruction line used an unknown opcode.
    UnknownOpcode { line: usize, opcode: String },
    /// An instruction is missing its operand.
    MissingOperand { line: usize, opcode: String },
    /// A numeric operand did not parse.
    InvalidOperand { line: usize, value: String },
    /// An instruction names a semaphore the header does not declare.
    UndeclaredSemaphore { line: usize, name: String },
}

impl std::fmt::Display for ProgramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgramError::MissingHeader(field) => write!(f, "missing header line: {field}"),
            ProgramError::InvalidHeader { field, value } => {
                write!(f, "header field {field} is not a number: {value:?}")
            }
            ProgramError::MissingSeparator => {
                write!(f, "missing blank line between header and code")
            }
            ProgramError::EmptyCode => write!(f, "program has no instructions"),
            ProgramError::UnknownOpcode { line, opcode } => {
                write!(f, "line {line}: unknown opcode {opcode:?}")
            }
            ProgramError::MissingOperand { line, opcode } => {
                write!(f, "line {line}: {opcode} needs an operand")
            }
            ProgramError::InvalidOperand { line, value } => {
                write!(f, "line {line}: operand is not a number: {value:?}")
            }
            ProgramError::UndeclaredSemaphore { line, name } => {
                write!(f, "line {line}: semaphore {name:?} is not declared in the header")
            }
        }
    }
}

impl std::error::Error for ProgramError {}

/// Parse one synthetic program text.
pub fn parse(source: &str) -> Result<Program, ProgramError> {
    let mut lines = source.lines();

    let name = match lines.next().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(ProgramError::MissingHeader("name")),
    };
    let seg_id = int_header(lines.next(), "segment id")?;
    let priority = match int_header(lines.next(), "priority")? {
        1 => Priority::High,
        _ => Priority::Low,
    };
    let seg_size_kb = int_header(lines.next(), "segment size")?;
    let semaphores: Vec<String> = lines
        .next()
        .ok_or(ProgramError::MissingHeader("semaphores"))?
        .split_whitespace()
        .map(str::to_string)
        .collect();

    match lines.next() {
        Some(line) if line.trim().is_empty() => {}
        _ => return Err(ProgramError::MissingSeparator),
    }

    let mut code = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Header plus separator occupy the first six lines of the file.
        code.push(parse_instr(line, idx + 7, &semaphores)?);
    }
    if code.is_empty() {
        return Err(ProgramError::EmptyCode);
    }

    Ok(Program {
        name,
        seg_id,
        priority,
        seg_size_kb,
        semaphores,
        code,
    })
}

fn int_header(line: Option<&str>, field: &'static str) -> Result<u32, ProgramError> {
    let line = line.map(str::trim).ok_or(ProgramError::MissingHeader(field))?;
    line.parse()
        .map_err(|_| ProgramError::InvalidHeader {
            field,
            value: line.to_string(),
        })
}

fn parse_instr(line: &str, lineno: usize, declared: &[String]) -> Result<Instr, ProgramError> {
    let mut parts = line.split_whitespace();
    let opcode = parts.next().expect("line is non-empty");
    let operand = parts.next();

    let number = |value: Option<&str>| -> Result<u32, ProgramError> {
        let value = value.ok_or_else(|| ProgramError::MissingOperand {
            line: lineno,
            opcode: opcode.to_string(),
        })?;
        value.parse().map_err(|_| ProgramError::InvalidOperand {
            line: lineno,
            value: value.to_string(),
        })
    };
    let semaphore = |value: Option<&str>| -> Result<String, ProgramError> {
        let name = value.ok_or_else(|| ProgramError::MissingOperand {
            line: lineno,
            opcode: opcode.to_string(),
        })?;
        if !declared.iter().any(|s| s == name) {
            return Err(ProgramError::UndeclaredSemaphore {
                line: lineno,
                name: name.to_string(),
            });
        }
        Ok(name.to_string())
    };

    match opcode.to_ascii_uppercase().as_str() {
        "EXEC" => Ok(Instr::Exec(number(operand)?)),
        "READ" => Ok(Instr::Read(number(operand)?)),
        "WRITE" => Ok(Instr::Write(number(operand)?)),
        "PRINT" => Ok(Instr::Print(number(operand)?)),
        "SEM_P" => Ok(Instr::SemP(semaphore(operand)?)),
        "SEM_V" => Ok(Instr::SemV(semaphore(operand)?)),
        _ => Err(ProgramError::UnknownOpcode {
            line: lineno,
            opcode: opcode.to_string(),
        }),
    }
}
