//! `devflow executors`: registered action types and their parameter schemas.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use serde_json::Value;

use crate::state::AppState;

pub fn list(state: &AppState, json: bool) -> Result<()> {
    let schemas = state.engine.registry().schemas();

    if json {
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Action type").fg(Color::Cyan),
            Cell::new("Parameters"),
        ]);

    for (action_type, schema) in &schemas {
        table.add_row(vec![Cell::new(action_type), Cell::new(describe_parameters(schema))]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// `name: type` per property, required ones marked with `*`.
fn describe_parameters(schema: &Value) -> String {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return String::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| {
            let ty = match prop.get("type") {
                Some(Value::String(t)) => t.clone(),
                Some(Value::Array(types)) => types
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|t| *t != "null")
                    .collect::<Vec<_>>()
                    .join("|"),
                _ => "any".to_string(),
            };
            let marker = if required.contains(&name.as_str()) { "*" } else { "" };
            format!("{name}{marker}: {ty}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}
