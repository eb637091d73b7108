//! Prologue builtins.
//!
//! The standard-library surface is specified at its interface boundary: a
//! name, a lambda type, and a VM-side behavior. Identifiers that resolve to
//! prologue symbols lower to `$f:<NAME>` function locations; calling one
//! dispatches here instead of jumping into an inline region.

use swarm_core::types::Type;
use swarm_isa::{EnumerationValue, Reference};

use crate::error::{RuntimeError, RuntimeExCode, VmError};
use crate::vm::VirtualMachine;

/// The lambda type of a builtin, when `name` is one.
pub fn signature(name: &str) -> Option<Type> {
    let (params, ret) = match name {
        "LOG" | "ERR" => (vec![Type::string()], Type::void()),
        "NUMBER_TO_STRING" => (vec![Type::number()], Type::string()),
        "BOOLEAN_TO_STRING" => (vec![Type::boolean()], Type::string()),
        "STRING_TO_NUMBER" => (vec![Type::string()], Type::number()),
        "MIN" | "MAX" | "NTH_ROOT" => (vec![Type::number(), Type::number()], Type::number()),
        "FLOOR" | "CEILING" => (vec![Type::number()], Type::number()),
        "RANDOM" => (vec![], Type::number()),
        "RANGE" => (
            vec![Type::number(), Type::number(), Type::number()],
            Type::enumerable(Type::number()),
        ),
        _ => return None,
    };
    Some(Type::lambda(params, ret))
}

pub fn is_builtin(name: &str) -> bool {
    signature(name).is_some()
}

/// Format a number the way the surface language prints it: integers without
/// a decimal point.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn number_arg(args: &[Reference], i: usize) -> Result<f64, VmError> {
    match args.get(i) {
        Some(Reference::Number(n)) => Ok(*n),
        other => Err(RuntimeError::new(
            RuntimeExCode::InvalidArgumentType,
            format!("expected number argument, found {other:?}"),
        )
        .into()),
    }
}

fn string_arg(args: &[Reference], i: usize) -> Result<String, VmError> {
    match args.get(i) {
        Some(Reference::String(s)) => Ok(s.clone()),
        other => Err(RuntimeError::new(
            RuntimeExCode::InvalidArgumentType,
            format!("expected string argument, found {other:?}"),
        )
        .into()),
    }
}

fn boolean_arg(args: &[Reference], i: usize) -> Result<bool, VmError> {
    match args.get(i) {
        Some(Reference::Boolean(b)) => Ok(*b),
        other => Err(RuntimeError::new(
            RuntimeExCode::InvalidArgumentType,
            format!("expected boolean argument, found {other:?}"),
        )
        .into()),
    }
}

/// Execute a builtin against fully-evaluated arguments.
pub fn call(
    vm: &mut VirtualMachine,
    name: &str,
    args: &[Reference],
) -> Result<Option<Reference>, VmError> {
    match name {
        "LOG" => {
            vm.push_stream("STDOUT", Reference::String(string_arg(args, 0)?));
            Ok(None)
        }
        "ERR" => {
            vm.push_stream("STDERR", Reference::String(string_arg(args, 0)?));
            Ok(None)
        }
        "NUMBER_TO_STRING" => Ok(Some(Reference::String(format_number(number_arg(
            args, 0,
        )?)))),
        "BOOLEAN_TO_STRING" => {
            // Branches on the value: false really prints "false".
            let text = if boolean_arg(args, 0)? { "true" } else { "false" };
            Ok(Some(Reference::String(text.into())))
        }
        "STRING_TO_NUMBER" => {
            let s = string_arg(args, 0)?;
            s.trim()
                .parse::<f64>()
                .map(|n| Some(Reference::Number(n)))
                .map_err(|_| {
                    RuntimeError::new(
                        RuntimeExCode::TypeError,
                        format!("\"{s}\" is not a number"),
                    )
                    .into()
                })
        }
        "MIN" => Ok(Some(Reference::Number(
            number_arg(args, 0)?.min(number_arg(args, 1)?),
        ))),
        "MAX" => Ok(Some(Reference::Number(
            number_arg(args, 0)?.max(number_arg(args, 1)?),
        ))),
        "FLOOR" => Ok(Some(Reference::Number(number_arg(args, 0)?.floor()))),
        "CEILING" => Ok(Some(Reference::Number(number_arg(args, 0)?.ceil()))),
        "RANDOM" => Ok(Some(Reference::Number(rand::random::<f64>()))),
        "NTH_ROOT" => {
            let n = number_arg(args, 0)?;
            let x = number_arg(args, 1)?;
            if n == 0.0 {
                return Err(
                    RuntimeError::new(RuntimeExCode::DivisionByZero, "0th root").into(),
                );
            }
            Ok(Some(Reference::Number(x.powf(1.0 / n))))
        }
        "RANGE" => {
            let start = number_arg(args, 0)?;
            let end = number_arg(args, 1)?;
            let step = number_arg(args, 2)?;
            if step <= 0.0 {
                return Err(RuntimeError::new(
                    RuntimeExCode::InvalidArgumentType,
                    "range step must be positive",
                )
                .into());
            }
            let mut items = Vec::new();
            let mut v = start;
            while v <= end {
                items.push(Reference::Number(v));
                v += step;
            }
            Ok(Some(Reference::Enumeration(EnumerationValue {
                inner: Type::number(),
                items,
            })))
        }
        other => Err(RuntimeError::new(
            RuntimeExCode::TypeError,
            format!("unknown prologue function {other}"),
        )
        .into()),
    }
}

/// Render a reference for stream output.
pub fn format_reference(value: &Reference) -> String {
    match value {
        Reference::String(s) => s.clone(),
        Reference::Number(n) => format_number(*n),
        Reference::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_to_string_branches_on_value() {
        let t = call_direct("BOOLEAN_TO_STRING", &[Reference::Boolean(true)]);
        let f = call_direct("BOOLEAN_TO_STRING", &[Reference::Boolean(false)]);
        assert_eq!(t, Some(Reference::String("true".into())));
        assert_eq!(f, Some(Reference::String("false".into())));
    }

    #[test]
    fn number_to_string_drops_integral_fraction() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[test]
    fn range_is_inclusive_of_end_on_step_boundary() {
        let out = call_direct(
            "RANGE",
            &[
                Reference::Number(0.0),
                Reference::Number(3.0),
                Reference::Number(1.0),
            ],
        );
        match out {
            Some(Reference::Enumeration(e)) => assert_eq!(e.items.len(), 4),
            other => panic!("expected enumeration, got {other:?}"),
        }
    }

    /// Builtins that never touch the VM can run against a scratch one.
    fn call_direct(name: &str, args: &[Reference]) -> Option<Reference> {
        let mut vm = VirtualMachine::new(vec![], crate::config::VmConfig::default()).unwrap();
        call(&mut vm, name, args).unwrap()
    }
}
