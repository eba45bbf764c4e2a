//! Textual IR dump, for `--dump-ir` and debugging.

use std::fmt::Write;

use crate::{CmpKind, EntityId, Function, InstKind, Terminator};

/// Render a function's IR as text. Values are numbered by arena index;
/// zero-use values are marked disabled.
pub fn dump_function(func: &Function) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "function {}", func.name);

    for (block_id, block) in func.blocks.iter() {
        let _ = writeln!(out, "  block{}:", block_id.into_usize());
        for &value in &block.insts {
            let inst = func.inst(value);
            let disabled = if inst.refs == 0 && !inst.has_side_effects() {
                " (disabled)"
            } else {
                ""
            };
            let v = value.into_usize();
            let line = match &inst.kind {
                InstKind::Parameter { name: Some(name) } => {
                    format!("${v} = parameter \"{name}\"")
                }
                InstKind::Parameter { name: None } => format!("${v} = parameter (pruned)"),
                InstKind::Int { constant } => format!("${v} = int {constant}"),
                InstKind::Add { a, b } => {
                    format!("${v} = add ${}, ${}", a.into_usize(), b.into_usize())
                }
                InstKind::Sub { a, b } => {
                    format!("${v} = sub ${}, ${}", a.into_usize(), b.into_usize())
                }
                InstKind::Cmp { kind, a, b } => format!(
                    "${v} = cmp {} ${}, ${}",
                    cmp_name(*kind),
                    a.into_usize(),
                    b.into_usize()
                ),
                InstKind::Global { name } => format!("${v} = global \"{name}\""),
                InstKind::Call { callee, args } => {
                    let args: Vec<_> =
                        args.iter().map(|a| format!("${}", a.into_usize())).collect();
                    format!(
                        "${v} = call ${} ({})",
                        callee.into_usize(),
                        args.join(", ")
                    )
                }
                InstKind::NewObject => format!("${v} = new_object"),
                InstKind::GetAttr { obj, name } => {
                    format!("${v} = get_attr ${}, \"{name}\"", obj.into_usize())
                }
                InstKind::GetLoc { loc } => format!("${v} = get_loc ${}", loc.into_usize()),
                InstKind::SetLoc { loc, value } => format!(
                    "${v} = set_loc ${}, ${}",
                    loc.into_usize(),
                    value.into_usize()
                ),
            };
            let _ = writeln!(out, "    {line}{disabled}");
        }
        match &block.terminator {
            Some(Terminator::Return { value }) => {
                let _ = writeln!(out, "    return ${}", value.into_usize());
            }
            Some(Terminator::Branch { target, args }) => {
                let args: Vec<_> = args.iter().map(|a| format!("${}", a.into_usize())).collect();
                let _ = writeln!(
                    out,
                    "    branch block{} ({})",
                    target.into_usize(),
                    args.join(", ")
                );
            }
            Some(Terminator::CBranch {
                cond,
                true_target,
                false_target,
            }) => {
                let _ = writeln!(
                    out,
                    "    cbranch ${} (true: block{}, false: block{})",
                    cond.into_usize(),
                    true_target.into_usize(),
                    false_target.into_usize()
                );
            }
            None => {
                let _ = writeln!(out, "    <no terminator>");
            }
        }
    }
    out
}

fn cmp_name(kind: CmpKind) -> &'static str {
    match kind {
        CmpKind::Less => "lt",
        CmpKind::Greater => "gt",
        CmpKind::Equal => "eq",
        CmpKind::NotEqual => "ne",
        CmpKind::LessEq => "le",
        CmpKind::GreaterEq => "ge",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{name, InstKind, Terminator};

    #[test]
    fn test_dump_simple_function() {
        let mut func = Function::new(name("main"));
        let entry = func.entry_block();
        let a = func.append_inst(entry, InstKind::Int { constant: 1 });
        let b = func.append_inst(entry, InstKind::Int { constant: 2 });
        let sum = func.append_inst(entry, InstKind::Add { a, b });
        func.add_ref(a);
        func.add_ref(b);
        func.add_ref(sum);
        func.set_terminator(entry, Terminator::Return { value: sum });

        let text = dump_function(&func);
        assert!(text.contains("function main"));
        assert!(text.contains("block0:"));
        assert!(text.contains("$0 = int 1"));
        assert!(text.contains("$2 = add $0, $1"));
        assert!(text.contains("return $2"));
    }
}
