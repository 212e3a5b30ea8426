use std::collections::BTreeMap;
use std::fmt::Write;

use console::{Alignment, measure_text_width, pad_str, style};
use serde_json::Value;

use super::{FUNCTION_PREFIX, FunctionRegistry, FunctionSchema};

/// All registered functions, grouped.
pub fn function_list(registry: &FunctionRegistry) -> String {
    let mut groups: BTreeMap<&str, Vec<&FunctionSchema>> = BTreeMap::new();
    for schema in registry.schemas() {
        groups.entry(schema.group()).or_default().push(schema);
    }

    let mut out = String::new();
    for (group, schemas) in groups {
        let _ = writeln!(out, "\n{}", style(group).bold().cyan());
        let rows: Vec<Vec<String>> = schemas
            .iter()
            .map(|s| vec![s.name().to_string(), s.description().to_string()])
            .collect();
        out.push_str(&render_table(&["Function", "Description"], &rows));
    }
    out
}

/// Arguments and return value of one function. Accepts `add` or `$add`.
pub fn function_help(registry: &FunctionRegistry, name: &str) -> Option<String> {
    let mut name = name.to_lowercase();
    if !name.starts_with(FUNCTION_PREFIX) {
        name.insert(0, FUNCTION_PREFIX);
    }
    let schema = registry.schema(&name)?;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Function `{}` - {}\n",
        style(schema.title()).bold(),
        schema.description()
    );

    if let Some(returns) = schema.returns() {
        let kind = returns.get("type").and_then(Value::as_str).unwrap_or("--");
        let description = returns
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");
        let _ = writeln!(out, "Returns ({}) {}\n", kind, description);

        if let Some(Value::Object(props)) = returns.get("properties") {
            let _ = writeln!(out, "{}", style("Returned object properties").bold());
            let rows: Vec<Vec<String>> = props
                .iter()
                .map(|(prop, data)| {
                    vec![
                        prop.clone(),
                        type_name(data),
                        text(data, "description").unwrap_or("").to_string(),
                    ]
                })
                .collect();
            out.push_str(&render_table(&["Name", "Type", "Description"], &rows));
            out.push('\n');
        }
    }

    let _ = writeln!(out, "{}", style("Arguments").bold());
    let rows = argument_rows(schema.document());
    if rows.is_empty() {
        out.push_str("This function has no parameters.\n");
    } else {
        out.push_str(&render_table(
            &["Required", "Name", "Type", "Description"],
            &rows,
        ));
    }
    Some(out)
}

fn argument_rows(schema: &Value) -> Vec<Vec<String>> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(Value::Object(properties)) = schema.get("properties") else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, data)| {
            let mut description = text(data, "description")
                .unwrap_or("No description available")
                .to_string();
            if let Some(Value::Array(options)) = data.get("oneOf") {
                let alternatives: Vec<String> = options
                    .iter()
                    .map(|o| format!("{} ({})", type_name(o), text(o, "description").unwrap_or("")))
                    .collect();
                let _ = write!(description, ". One of: {}", alternatives.join(" or "));
            }
            vec![
                if required.contains(&name.as_str()) { "*" } else { "" }.to_string(),
                name.clone(),
                type_name(data),
                description,
            ]
        })
        .collect()
}

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn type_name(value: &Value) -> String {
    match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        _ => "--".to_string(),
    }
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| measure_text_width(h)).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(measure_text_width(cell));
        }
    }

    let mut out = table_line(headers, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&table_line(&rule, &widths));
    for row in rows {
        out.push_str(&table_line(row, &widths));
    }
    out
}

fn table_line<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| pad_str(cell.as_ref(), *width, Alignment::Left, None).into_owned())
        .collect();
    format!("  {}\n", padded.join("  ").trim_end())
}
