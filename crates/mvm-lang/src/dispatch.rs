//! Dispatch shim generation.
//!
//! For every exported contract function this emits, in the contract's
//! own language, a JSON-tagged parameter record and a byte-in/any-out
//! handler, plus the init-time registration block the bridge template
//! consumes. The emitted file shares the contract's package name; the
//! compiler driver rewrites both to the WASM entry package.

use std::fmt::Write;

use mvm_core::{Abi, AbiFunction, CORE_IMPORT_PATH};

/// Generate the dispatch source for an extracted ABI.
pub fn generate_dispatch(abi: &Abi) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Code generated by the contract pipeline. DO NOT EDIT.");
    let _ = writeln!(out);
    let _ = writeln!(out, "package {}", abi.package);
    let _ = writeln!(out);

    let _ = writeln!(out, "import (");
    let _ = writeln!(out, "\t\"encoding/json\"");
    let _ = writeln!(out, "\t\"fmt\"");
    if references_core(abi) {
        let _ = writeln!(out, "\n\t\"{}\"", core_import_path(abi));
    }
    let _ = writeln!(out, ")");
    let _ = writeln!(out);

    for function in &abi.functions {
        emit_params_struct(&mut out, function);
        emit_handler(&mut out, function);
    }

    emit_registration(&mut out, abi);
    out
}

/// True when a generated record field names a `core.` type, which
/// forces the import into the dispatch file.
fn references_core(abi: &Abi) -> bool {
    abi.functions.iter().any(|f| {
        f.caller_inputs()
            .iter()
            .any(|p| p.type_name.contains("core."))
    })
}

/// The path the contract imported under the `core` name, falling back
/// to the canonical one.
fn core_import_path(abi: &Abi) -> String {
    for imp in &abi.imports {
        let local = if imp.alias.is_empty() {
            imp.path.rsplit('/').next().unwrap_or(imp.path.as_str())
        } else {
            imp.alias.as_str()
        };
        if local == "core" {
            return imp.path.clone();
        }
    }
    CORE_IMPORT_PATH.to_string()
}

fn emit_params_struct(out: &mut String, function: &AbiFunction) {
    let _ = writeln!(
        out,
        "// {name}Params mirrors the JSON arguments of {name}.",
        name = function.name
    );
    let _ = writeln!(out, "type {}Params struct {{", function.name);
    for (idx, param) in function.caller_inputs().iter().enumerate() {
        let field = field_name(&param.name, idx);
        let tag = json_tag(&param.name, idx);
        let ty = record_type(&param.type_name);
        let _ = writeln!(out, "\t{field} {ty} `json:\"{tag},omitempty\"`");
    }
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
}

fn emit_handler(out: &mut String, function: &AbiFunction) {
    let name = &function.name;
    let _ = writeln!(
        out,
        "func handle{name}(params []byte) (interface{{}}, error) {{"
    );
    let _ = writeln!(out, "\tvar args {name}Params");
    let _ = writeln!(out, "\tif len(params) > 0 {{");
    let _ = writeln!(
        out,
        "\t\tif err := json.Unmarshal(params, &args); err != nil {{"
    );
    let _ = writeln!(
        out,
        "\t\t\treturn nil, fmt.Errorf(\"{name}: invalid params: %w\", err)"
    );
    let _ = writeln!(out, "\t\t}}");
    let _ = writeln!(out, "\t}}");

    let mut call_args: Vec<String> = Vec::new();
    if function.takes_context() {
        call_args.push("ambientContext()".to_string());
    }
    for (idx, param) in function.caller_inputs().iter().enumerate() {
        let mut arg = format!("args.{}", field_name(&param.name, idx));
        if param.type_name.starts_with("...") {
            arg.push_str("...");
        }
        call_args.push(arg);
    }
    let call = format!("{name}({})", call_args.join(", "));

    match function.outputs.len() {
        0 => {
            let _ = writeln!(out, "\t{call}");
            let _ = writeln!(out, "\treturn nil, nil");
        }
        1 => {
            let _ = writeln!(out, "\tr0 := {call}");
            let _ = writeln!(out, "\treturn {}, nil", result_value(0, &function.outputs[0].type_name));
        }
        n => {
            let names: Vec<String> = (0..n).map(|i| format!("r{i}")).collect();
            let _ = writeln!(out, "\t{} := {call}", names.join(", "));
            let rendered: Vec<String> = function
                .outputs
                .iter()
                .enumerate()
                .map(|(i, p)| result_value(i, &p.type_name))
                .collect();
            let _ = writeln!(
                out,
                "\treturn []interface{{}}{{{}}}, nil",
                rendered.join(", ")
            );
        }
    }
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
}

fn emit_registration(out: &mut String, abi: &Abi) {
    let _ = writeln!(out, "func init() {{");
    // Referencing the codec and the formatter here keeps both alive
    // through the WASM linker's dead-code elimination.
    let _ = writeln!(out, "\t_ = json.Valid");
    let _ = writeln!(out, "\t_ = fmt.Sprint");
    for function in &abi.functions {
        let _ = writeln!(
            out,
            "\tregisterHandler(\"{name}\", handle{name})",
            name = function.name
        );
    }
    let _ = writeln!(out, "}}");
}

/// Record field name: the parameter name title-cased, `ArgN` for
/// unnamed positions.
fn field_name(name: &str, idx: usize) -> String {
    if name.is_empty() {
        return format!("Arg{idx}");
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => format!("Arg{idx}"),
    }
}

fn json_tag(name: &str, idx: usize) -> String {
    if name.is_empty() {
        format!("arg{idx}")
    } else {
        name.to_string()
    }
}

/// Field type in the record: variadic parameters become slices.
fn record_type(type_name: &str) -> String {
    match type_name.strip_prefix("...") {
        Some(elem) => format!("[]{elem}"),
        None => type_name.to_string(),
    }
}

/// Rendering of one return value. `error` outputs pass through the
/// bridge's errValue helper so callers see null or a message string
/// instead of an empty object.
fn result_value(idx: usize, type_name: &str) -> String {
    if type_name == "error" {
        format!("errValue(r{idx})")
    } else {
        format!("r{idx}")
    }
}
