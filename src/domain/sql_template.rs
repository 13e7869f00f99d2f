//! SQL text templates rendered against a [`TableInfo`].
//!
//! The language is deliberately small: `{{.Field}}` substitution over the
//! table-info fields, list rendering with optional slicing
//! (`{{.Columns[1:]}}`), and iteration (`{{range .Columns[1:]}}…{{.}}…{{end}}`).
//! Column lists render as comma-separated double-quoted identifiers so they
//! can be dropped into a SELECT list; user and role lists render as
//! single-quoted literals. Both parse and render failures are returned as
//! values, since a broken template must only fail its own rule.

use std::fmt::Write as _;

use thiserror::Error;

use super::TableInfo;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template parse error: {message}")]
    Parse { message: String },
    #[error("template render error: {message}")]
    Render { message: String },
}

impl TemplateError {
    fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }
}

/// Render `template` against `info`, returning the executable SQL string.
pub fn render(template: &str, info: &TableInfo) -> Result<String, TemplateError> {
    let nodes = parse(template)?;
    let mut out = String::with_capacity(template.len());
    render_nodes(&nodes, info, None, &mut out)?;
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Expr(Expr),
    Range { items: ListExpr, body: Vec<Node> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    /// `{{.}}`: the current item inside a range body.
    Current,
    Scalar(Scalar),
    List(ListExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Table,
    Timezone,
    ShortUserId,
    DeviceId,
    ShortDeviceId,
    ServiceId,
    ShortServiceId,
    ExportId,
    ShortExportId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListSource {
    Columns,
    UserIds,
    Roles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slice {
    Full,
    Index(usize),
    Bounds(Option<usize>, Option<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListExpr {
    source: ListSource,
    slice: Slice,
}

fn parse(template: &str) -> Result<Vec<Node>, TemplateError> {
    // Stack of (pending range expr, accumulated body); the bottom entry is
    // the top-level node list.
    let mut stack: Vec<(Option<ListExpr>, Vec<Node>)> = vec![(None, Vec::new())];
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            stack
                .last_mut()
                .expect("parser stack is never empty")
                .1
                .push(Node::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| TemplateError::parse("unclosed {{ action"))?;
        let action = after[..end].trim();
        rest = &after[end + 2..];

        if let Some(list) = action.strip_prefix("range ") {
            let items = parse_list_expr(list.trim())?;
            stack.push((Some(items), Vec::new()));
        } else if action == "end" {
            let (items, body) = stack
                .pop()
                .ok_or_else(|| TemplateError::parse("{{end}} without {{range}}"))?;
            let items =
                items.ok_or_else(|| TemplateError::parse("{{end}} without {{range}}"))?;
            stack
                .last_mut()
                .expect("parser stack is never empty")
                .1
                .push(Node::Range { items, body });
        } else {
            let expr = parse_expr(action)?;
            stack
                .last_mut()
                .expect("parser stack is never empty")
                .1
                .push(Node::Expr(expr));
        }
    }

    if !rest.is_empty() {
        stack
            .last_mut()
            .expect("parser stack is never empty")
            .1
            .push(Node::Text(rest.to_string()));
    }
    if stack.len() != 1 {
        return Err(TemplateError::parse("unterminated {{range}}"));
    }
    Ok(stack.pop().expect("parser stack is never empty").1)
}

fn parse_expr(action: &str) -> Result<Expr, TemplateError> {
    if action == "." {
        return Ok(Expr::Current);
    }
    let field = action
        .strip_prefix('.')
        .ok_or_else(|| TemplateError::parse(format!("unsupported action {action:?}")))?;
    let scalar = match field {
        "Table" => Some(Scalar::Table),
        "Timezone" => Some(Scalar::Timezone),
        "ShortUserId" => Some(Scalar::ShortUserId),
        "DeviceId" => Some(Scalar::DeviceId),
        "ShortDeviceId" => Some(Scalar::ShortDeviceId),
        "ServiceId" => Some(Scalar::ServiceId),
        "ShortServiceId" => Some(Scalar::ShortServiceId),
        "ExportId" => Some(Scalar::ExportId),
        "ShortExportId" => Some(Scalar::ShortExportId),
        _ => None,
    };
    if let Some(scalar) = scalar {
        return Ok(Expr::Scalar(scalar));
    }
    parse_list_expr(action).map(Expr::List)
}

fn parse_list_expr(action: &str) -> Result<ListExpr, TemplateError> {
    let field = action
        .strip_prefix('.')
        .ok_or_else(|| TemplateError::parse(format!("unsupported action {action:?}")))?;
    let (name, slice_text) = match field.find('[') {
        Some(open) => {
            let close = field
                .rfind(']')
                .filter(|close| *close == field.len() - 1)
                .ok_or_else(|| {
                    TemplateError::parse(format!("malformed slice in {action:?}"))
                })?;
            (&field[..open], Some(&field[open + 1..close]))
        }
        None => (field, None),
    };
    let source = match name {
        "Columns" => ListSource::Columns,
        "UserIds" => ListSource::UserIds,
        "Roles" => ListSource::Roles,
        _ => return Err(TemplateError::parse(format!("unknown field {action:?}"))),
    };
    let slice = match slice_text {
        None => Slice::Full,
        Some(text) => parse_slice(text, action)?,
    };
    Ok(ListExpr { source, slice })
}

fn parse_slice(text: &str, action: &str) -> Result<Slice, TemplateError> {
    let malformed = || TemplateError::parse(format!("malformed slice in {action:?}"));
    match text.split_once(':') {
        None => {
            let index = text.trim().parse().map_err(|_| malformed())?;
            Ok(Slice::Index(index))
        }
        Some((start, end)) => {
            let parse_bound = |bound: &str| -> Result<Option<usize>, TemplateError> {
                let bound = bound.trim();
                if bound.is_empty() {
                    Ok(None)
                } else {
                    bound.parse().map(Some).map_err(|_| malformed())
                }
            };
            Ok(Slice::Bounds(parse_bound(start)?, parse_bound(end)?))
        }
    }
}

fn render_nodes(
    nodes: &[Node],
    info: &TableInfo,
    current: Option<&str>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Expr(Expr::Current) => match current {
                Some(item) => out.push_str(item),
                None => {
                    return Err(TemplateError::render("{{.}} used outside of a range"));
                }
            },
            Node::Expr(Expr::Scalar(scalar)) => out.push_str(scalar_value(*scalar, info)),
            Node::Expr(Expr::List(list)) => {
                let items = resolve_list(list, info)?;
                let rendered: Vec<String> = match list.source {
                    ListSource::Columns => items.iter().map(|c| quote_ident(c)).collect(),
                    ListSource::UserIds | ListSource::Roles => {
                        items.iter().map(|v| quote_literal(v)).collect()
                    }
                };
                let _ = write!(out, "{}", rendered.join(", "));
            }
            Node::Range { items, body } => {
                for item in resolve_list(items, info)? {
                    render_nodes(body, info, Some(item), out)?;
                }
            }
        }
    }
    Ok(())
}

fn scalar_value<'a>(scalar: Scalar, info: &'a TableInfo) -> &'a str {
    match scalar {
        Scalar::Table => &info.table,
        Scalar::Timezone => &info.timezone,
        Scalar::ShortUserId => &info.short_user_id,
        Scalar::DeviceId => &info.device_id,
        Scalar::ShortDeviceId => &info.short_device_id,
        Scalar::ServiceId => &info.service_id,
        Scalar::ShortServiceId => &info.short_service_id,
        Scalar::ExportId => &info.export_id,
        Scalar::ShortExportId => &info.short_export_id,
    }
}

fn resolve_list<'a>(
    list: &ListExpr,
    info: &'a TableInfo,
) -> Result<Vec<&'a str>, TemplateError> {
    let items: &[String] = match list.source {
        ListSource::Columns => &info.columns,
        ListSource::UserIds => &info.user_ids,
        ListSource::Roles => &info.roles,
    };
    let selected: &[String] = match list.slice {
        Slice::Full => items,
        Slice::Index(index) => {
            let item = items.get(index).ok_or_else(|| {
                TemplateError::render(format!(
                    "index {index} out of range for list of {}",
                    items.len()
                ))
            })?;
            std::slice::from_ref(item)
        }
        Slice::Bounds(start, end) => {
            let start = start.unwrap_or(0);
            let end = end.unwrap_or(items.len());
            if start > end || end > items.len() {
                return Err(TemplateError::render(format!(
                    "slice [{start}:{end}] out of range for list of {}",
                    items.len()
                )));
            }
            &items[start..end]
        }
    };
    Ok(selected.iter().map(String::as_str).collect())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
