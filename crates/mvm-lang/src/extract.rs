//! ABI extraction.
//!
//! Pure function of the screened source: enumerates exported top-level
//! functions with their typed signatures, collects imports, and infers
//! events from `Log` calls in function bodies.

use mvm_core::{Abi, AbiError, AbiEvent, AbiFunction, AbiImport, AbiParam};

use crate::ast::{walk_exprs, Expr, Param, SourceFile};
use crate::parser::print_type;

pub fn extract_abi(file: &SourceFile) -> Result<Abi, AbiError> {
    let mut functions = Vec::new();
    for func in file.exported_functions() {
        if functions.iter().any(|f: &AbiFunction| f.name == func.name) {
            return Err(AbiError(format!(
                "duplicate exported function {:?}",
                func.name
            )));
        }
        functions.push(AbiFunction {
            name: func.name.clone(),
            inputs: flatten_params(&func.params),
            outputs: flatten_params(&func.results),
        });
    }

    let imports = file
        .imports
        .iter()
        .map(|imp| AbiImport {
            path: imp.path.clone(),
            alias: imp.alias.clone().unwrap_or_default(),
        })
        .collect();

    let events = infer_events(file);

    Ok(Abi {
        package: file.package.clone(),
        functions,
        imports,
        events,
    })
}

/// Flatten grouped parameters (`a, b uint64`) into one entry per name.
/// Unnamed groups contribute a single entry with an empty name.
fn flatten_params(groups: &[Param]) -> Vec<AbiParam> {
    let mut out = Vec::new();
    for group in groups {
        let type_name = print_type(&group.ty);
        if group.names.is_empty() {
            out.push(AbiParam::new("", type_name));
        } else {
            for name in &group.names {
                out.push(AbiParam::new(name.clone(), type_name.clone()));
            }
        }
    }
    out
}

/// Events are log calls with a literal name: `ctx.Log("Transfer",
/// "from", from, "to", to)`. The string-literal keys at the odd
/// positions become the event's parameter names; value expressions are
/// dynamically typed at emit and contribute nothing here.
fn infer_events(file: &SourceFile) -> Vec<AbiEvent> {
    let mut events: Vec<AbiEvent> = Vec::new();
    for func in file.functions() {
        let Some(body) = &func.body else { continue };
        walk_exprs(body, &mut |expr| {
            let Expr::Call { func, args, .. } = expr else {
                return;
            };
            let Expr::Selector { sel, .. } = func.as_ref() else {
                return;
            };
            if sel != "Log" {
                return;
            }
            let Some(name) = args.first().and_then(|a| a.string_lit()) else {
                return;
            };
            let mut params = Vec::new();
            let mut idx = 1;
            while idx < args.len() {
                if let Some(key) = args[idx].string_lit() {
                    params.push(key.to_string());
                }
                idx += 2;
            }
            if !events.iter().any(|e| e.name == name) {
                events.push(AbiEvent {
                    name: name.to_string(),
                    params,
                });
            }
        });
    }
    events
}

/// Convenience for callers holding raw source.
pub fn extract_abi_from_source(source: &str) -> Result<Abi, AbiError> {
    let file = crate::parser::parse_source(source)
        .map_err(|e| AbiError(format!("parse: {e}")))?;
    extract_abi(&file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    const SOURCE: &str = r#"
package token

import (
	"github.com/meridian-net/vm/core"
	ct "github.com/meridian-net/vm/core/types"
)

func Transfer(ctx core.Context, to core.Address, amount uint64) (bool, error) {
	ctx.Log("Transfer", "to", to, "amount", amount)
	return true, nil
}

func GetUserInfo(id string) (string, int, error) {
	return "", 0, nil
}

func Multi(a, b uint64) {}

func Unnamed(uint64, []byte) {}

func helper(ctx core.Context) {
	ctx.Log("Audit", "who", "system")
}

func (t ct.Holder) Method() {}
"#;

    fn abi() -> Abi {
        extract_abi(&parse_source(SOURCE).unwrap()).unwrap()
    }

    #[test]
    fn exported_function_set_matches_source() {
        let abi = abi();
        let names: Vec<&str> = abi.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Transfer", "GetUserInfo", "Multi", "Unnamed"]);
    }

    #[test]
    fn inputs_and_outputs_keep_order_and_types() {
        let abi = abi();
        let transfer = abi.function("Transfer").unwrap();
        assert_eq!(transfer.inputs.len(), 3);
        assert_eq!(transfer.inputs[0].name, "ctx");
        assert_eq!(transfer.inputs[0].type_name, "core.Context");
        assert_eq!(transfer.inputs[1].type_name, "core.Address");
        assert_eq!(transfer.inputs[2].name, "amount");
        assert_eq!(transfer.outputs.len(), 2);
        assert_eq!(transfer.outputs[0].type_name, "bool");
        assert_eq!(transfer.outputs[1].type_name, "error");
    }

    #[test]
    fn grouped_and_unnamed_parameters() {
        let abi = abi();
        let multi = abi.function("Multi").unwrap();
        assert_eq!(multi.inputs.len(), 2);
        assert_eq!(multi.inputs[0].name, "a");
        assert_eq!(multi.inputs[1].name, "b");

        let unnamed = abi.function("Unnamed").unwrap();
        assert_eq!(unnamed.inputs[0].name, "");
        assert_eq!(unnamed.inputs[1].type_name, "[]byte");
    }

    #[test]
    fn imports_with_aliases() {
        let abi = abi();
        assert_eq!(abi.imports.len(), 2);
        assert_eq!(abi.imports[0].alias, "");
        assert_eq!(abi.imports[1].alias, "ct");
        assert_eq!(abi.imports[1].path, "github.com/meridian-net/vm/core/types");
    }

    #[test]
    fn events_inferred_from_log_calls_in_any_function() {
        let abi = abi();
        assert_eq!(abi.events.len(), 2);
        let transfer = &abi.events[0];
        assert_eq!(transfer.name, "Transfer");
        assert_eq!(transfer.params, vec!["to", "amount"]);
        // helper() is unexported but its Log call still defines an event
        assert_eq!(abi.events[1].name, "Audit");
        assert_eq!(abi.events[1].params, vec!["who"]);
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = serde_json::to_string(&abi()).unwrap();
        let b = serde_json::to_string(&abi()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn duplicate_exports_fail() {
        let src = "package p\nfunc F() {}\nfunc F(x int) {}\n";
        assert!(extract_abi_from_source(src).is_err());
    }
}
