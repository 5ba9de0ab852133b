use std::fmt::Write as _;

use crate::models::{ColumnDescriptor, ObjectDescriptor, ObjectType, SchemaDescriptor};

pub const NO_OBJECTS_LINE: &str = "No tables or views are available to you.";

#[must_use]
pub fn build_prompt(request: &str, descriptor: &SchemaDescriptor, response_language: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("You translate questions into one read-only SQLite query.\n\n");
    let _ = writeln!(prompt, "Database: {}", descriptor.database_name);
    let _ = writeln!(prompt, "Schema: {}", descriptor.schema_name);
    prompt.push('\n');

    if descriptor.is_empty() {
        prompt.push_str(NO_OBJECTS_LINE);
        prompt.push('\n');
    } else {
        prompt.push_str("Available objects:\n");
        for object in descriptor.objects.values() {
            prompt.push('\n');
            prompt.push_str(&render_object(object));
        }
    }

    prompt.push_str("\nRules:\n");
    prompt.push_str("1. Return exactly one query.\n");
    prompt.push_str(
        "2. The query must only read data with SELECT. Never insert, update or delete rows, and never change the schema.\n",
    );
    prompt.push_str(
        "3. Reference only the objects listed above, qualified with their schema name.\n",
    );
    let _ = writeln!(
        prompt,
        "4. Write any text outside the query in this language: {response_language}."
    );
    prompt.push_str("5. Put the query in a fenced code block tagged sql.\n");

    let _ = write!(prompt, "\nQuestion: {}\n", request.trim());
    prompt
}

#[must_use]
pub fn render_object(object: &ObjectDescriptor) -> String {
    let label = match object.object_type {
        ObjectType::Table => "TABLE",
        ObjectType::View => "VIEW",
    };
    let mut block = format!("{label} {}", object.qualified_name());
    if !object.verified {
        block.push_str(" (unverified)");
    }
    block.push('\n');

    if let Some(description) = non_blank(object.description.as_deref()) {
        let _ = writeln!(block, "  {description}");
    }
    for column in &object.columns {
        let _ = writeln!(block, "  {}", render_column(column));
    }
    block
}

#[must_use]
pub fn render_column(column: &ColumnDescriptor) -> String {
    let nullability = if column.nullable { "NULL" } else { "NOT NULL" };
    let mut line = format!("- {}: {}, {nullability}", column.name, column.datatype);
    if let Some(description) = non_blank(column.human_description.as_deref()) {
        let _ = write!(line, ". {description}");
    }
    if !column.tags.is_empty() {
        let _ = write!(line, " [{}]", column.tags.join(", "));
    }
    line
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}
