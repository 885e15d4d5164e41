use std::collections::HashMap;

use crate::ast::StructureDef;

/// Why a type could not be sized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SizeError {
    Unknown(String),
    Cycle(String),
}

impl SizeError {
    pub fn message(&self) -> String {
        match self {
            SizeError::Unknown(name) => format!("unknown type '{}'", name),
            SizeError::Cycle(name) => {
                format!("structure '{}' contains itself", name)
            }
        }
    }
}

/// Byte size of a type as laid out in memory. This is the only place that
/// knows `boolean` is currently 8 bytes wide.
pub fn size_of(ty: &str, structures: &HashMap<String, StructureDef>) -> Result<u64, SizeError> {
    size_of_inner(ty, structures, &mut Vec::new())
}

fn size_of_inner(
    ty: &str,
    structures: &HashMap<String, StructureDef>,
    visiting: &mut Vec<String>,
) -> Result<u64, SizeError> {
    if ty.starts_with('*') {
        return Ok(8);
    }
    match ty {
        "integer" | "boolean" | "any" => Ok(8),
        "long" => Ok(16),
        _ => {
            if let Some(n) = ty.strip_prefix("any_") {
                return n
                    .parse::<u64>()
                    .map_err(|_| SizeError::Unknown(ty.to_string()));
            }
            let structure = structures
                .get(ty)
                .ok_or_else(|| SizeError::Unknown(ty.to_string()))?;
            if visiting.iter().any(|name| name == ty) {
                return Err(SizeError::Cycle(ty.to_string()));
            }
            visiting.push(ty.to_string());
            let mut size = 0;
            for field in &structure.fields {
                size += size_of_inner(&field.ty.node, structures, visiting)?;
            }
            visiting.pop();
            Ok(size)
        }
    }
}

/// Size of a type as a run of operand-stack or frame slots.
pub fn stack_size(ty: &str, structures: &HashMap<String, StructureDef>) -> Result<u64, SizeError> {
    Ok(round_up8(size_of(ty, structures)?))
}

pub fn round_up8(n: u64) -> u64 {
    (n + 7) / 8 * 8
}

/// Whether a value of type `given` may flow where `wanted` is declared:
/// exact match, `any` (any 8-byte value), or `any_N` (any value of size N).
pub fn compatible(given: &str, wanted: &str, structures: &HashMap<String, StructureDef>) -> bool {
    if wanted == given {
        return true;
    }
    if wanted == "any" {
        return size_of(given, structures) == Ok(8);
    }
    if let Some(n) = wanted.strip_prefix("any_") {
        if let Ok(n) = n.parse::<u64>() {
            return size_of(given, structures) == Ok(n);
        }
    }
    false
}
