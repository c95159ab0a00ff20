//! Descriptor compiler: `Query` → SQL text plus ordered bind parameters.
//!
//! Pure and deterministic. Clauses render in a fixed order and every bound
//! value becomes the next `$n` placeholder as the text is produced.

use regex::Regex;

use crate::error::{OrmError, OrmResult};
use crate::ident::{Ident, quote, quote_column, quote_table};
use crate::qb::expr::Expr;
use crate::qb::param::ParamList;
use crate::qb::query::{
    Assign, ConflictAction, Data, Join, JoinTarget, OrderItem, Query, SelectItem, StatementKind,
    WindowDef,
};
use crate::result::ResultMode;
use crate::schema::TableDef;

/// Compiled statement: SQL text and the values bound to `$1..$n`.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub text: String,
    pub params: ParamList,
}

/// Compile a descriptor.
pub fn compile(query: &Query) -> OrmResult<Compiled> {
    let mut params = ParamList::new();
    let text = write_query(query, &mut params)?;
    Ok(Compiled { text, params })
}

/// Render `query` into SQL, appending its bind values to `params`.
///
/// Sub-queries share the outer list so placeholders keep counting up.
pub(crate) fn write_query(query: &Query, params: &mut ParamList) -> OrmResult<String> {
    if let Some(err) = &query.build_error {
        return Err(OrmError::build(err.clone()));
    }
    match query.kind {
        StatementKind::Select => write_select(query, params),
        StatementKind::Insert => write_insert(query, params),
        StatementKind::Update => write_update(query, params),
        StatementKind::Delete => write_delete(query, params),
        StatementKind::Truncate => write_truncate(query),
        StatementKind::Raw => match &query.raw {
            Some(raw) => raw.build("", params),
            None => Err(OrmError::build("raw statement has no SQL")),
        },
    }
}

fn target(query: &Query) -> OrmResult<&TableDef> {
    query
        .table
        .as_deref()
        .ok_or_else(|| OrmError::build("query has no target table"))
}

/// `"schema"."table" [AS "alias"]`
fn table_ref(query: &Query) -> OrmResult<String> {
    let mut sql = quote_table(target(query)?.name())?;
    if let Some(alias) = &query.alias {
        sql.push_str(" AS ");
        sql.push_str(&quote(alias));
    }
    Ok(sql)
}

fn with_alias(mut sql: String, alias: Option<&String>) -> String {
    if let Some(alias) = alias {
        sql.push_str(" AS ");
        sql.push_str(&quote(alias));
    }
    sql
}

fn write_select(query: &Query, params: &mut ParamList) -> OrmResult<String> {
    let scope = query.scope();
    let mut sql = String::from("SELECT ");
    if query.distinct {
        sql.push_str("DISTINCT ");
    }

    if query.mode() == ResultMode::Exists {
        sql.push_str(r#"1 AS "exists""#);
    } else if query.select.is_empty() {
        sql.push('*');
    } else {
        let mut items = Vec::with_capacity(query.select.len());
        for item in &query.select {
            items.push(select_item(item, &scope, params)?);
        }
        sql.push_str(&items.join(", "));
    }

    sql.push_str(" FROM ");
    sql.push_str(&table_ref(query)?);

    for join in &query.joins {
        sql.push(' ');
        sql.push_str(join.kind.keyword());
        sql.push(' ');
        sql.push_str(&join_target(&join.target, params)?);
        sql.push_str(" ON ");
        let on = join.on.build(&join.target.scope(), params)?;
        sql.push_str(if on.is_empty() { "true" } else { on.as_str() });
    }

    push_predicate(&mut sql, " WHERE ", &query.filters, &scope, params)?;

    if !query.group.is_empty() {
        let columns = query
            .group
            .iter()
            .map(|c| quote_column(&scope, c))
            .collect::<OrmResult<Vec<_>>>()?;
        sql.push_str(" GROUP BY ");
        sql.push_str(&columns.join(", "));
    }

    push_predicate(&mut sql, " HAVING ", &query.having, &scope, params)?;

    if !query.windows.is_empty() {
        let mut defs = Vec::with_capacity(query.windows.len());
        for window in &query.windows {
            defs.push(window_def(window, &scope, params)?);
        }
        sql.push_str(" WINDOW ");
        sql.push_str(&defs.join(", "));
    }

    for union in &query.unions {
        sql.push(' ');
        sql.push_str(union.kind.keyword());
        sql.push_str(" (");
        sql.push_str(&write_query(&union.query, params)?);
        sql.push(')');
    }

    if !query.order.is_empty() {
        // Ordering a set operation can only name output columns.
        let order_scope = if query.unions.is_empty() { scope.as_str() } else { "" };
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_list(&query.order, order_scope, params)?);
    }

    if query.take {
        sql.push_str(" LIMIT 1");
    } else if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT ${}", params.push(limit)));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET ${}", params.push(offset)));
    }
    Ok(sql)
}

fn select_item(item: &SelectItem, scope: &str, params: &mut ParamList) -> OrmResult<String> {
    Ok(match item {
        SelectItem::Column { name, alias } => with_alias(quote_column(scope, name)?, alias.as_ref()),
        SelectItem::Expr { expr, alias } => with_alias(expr.build(scope, params)?, alias.as_ref()),
        SelectItem::Function {
            name,
            args,
            distinct,
            over,
            alias,
        } => {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(OrmError::build(format!("invalid function name: {name:?}")));
            }
            let args = args
                .iter()
                .map(|arg| match arg.as_str() {
                    "*" => Ok("*".to_string()),
                    column => quote_column(scope, column),
                })
                .collect::<OrmResult<Vec<_>>>()?;
            let mut sql = format!(
                "{name}({}{})",
                if *distinct { "DISTINCT " } else { "" },
                args.join(", ")
            );
            if let Some(window) = over {
                sql.push_str(" OVER ");
                sql.push_str(&quote(window));
            }
            with_alias(sql, alias.as_ref())
        }
        SelectItem::Relation { alias, query, many } => {
            let inner = write_query(query, params)?;
            let json = if *many {
                "COALESCE(json_agg(row_to_json(t.*)), '[]')"
            } else {
                "row_to_json(t.*)"
            };
            format!("(SELECT {json} AS json FROM ({inner}) AS t) AS {}", quote(alias))
        }
    })
}

fn join_target(target: &JoinTarget, params: &mut ParamList) -> OrmResult<String> {
    Ok(match target {
        JoinTarget::Table { name, alias } => with_alias(quote_table(name)?, alias.as_ref()),
        JoinTarget::Lateral { query, alias } => {
            format!("LATERAL ({}) AS {}", write_query(query, params)?, quote(alias))
        }
    })
}

fn push_predicate(
    sql: &mut String,
    keyword: &str,
    exprs: &[Expr],
    scope: &str,
    params: &mut ParamList,
) -> OrmResult<bool> {
    let rendered = Expr::join_group(exprs, " AND ", scope, params)?;
    if rendered.is_empty() {
        return Ok(false);
    }
    sql.push_str(keyword);
    sql.push_str(&rendered);
    Ok(true)
}

fn order_list(order: &[OrderItem], scope: &str, params: &mut ParamList) -> OrmResult<String> {
    let mut items = Vec::with_capacity(order.len());
    for item in order {
        items.push(match item {
            OrderItem::Column {
                name,
                desc,
                nulls_last,
            } => {
                let mut sql = quote_column(scope, name)?;
                if *desc {
                    sql.push_str(" DESC");
                }
                match nulls_last {
                    Some(true) => sql.push_str(" NULLS LAST"),
                    Some(false) => sql.push_str(" NULLS FIRST"),
                    None => {}
                }
                sql
            }
            OrderItem::Raw(expr) => expr.build(scope, params)?,
        });
    }
    Ok(items.join(", "))
}

fn window_def(window: &WindowDef, scope: &str, params: &mut ParamList) -> OrmResult<String> {
    let mut parts = Vec::new();
    if !window.partition_by.is_empty() {
        let columns = window
            .partition_by
            .iter()
            .map(|c| quote_column(scope, c))
            .collect::<OrmResult<Vec<_>>>()?;
        parts.push(format!("PARTITION BY {}", columns.join(", ")));
    }
    if !window.order.is_empty() {
        parts.push(format!("ORDER BY {}", order_list(&window.order, scope, params)?));
    }
    Ok(format!("{} AS ({})", quote(&window.name), parts.join(" ")))
}

fn set_column(column: &str) -> OrmResult<String> {
    Ok(Ident::parse(column)?.to_sql())
}

fn assignment(column: &str, value: &Assign, scope: &str, params: &mut ParamList) -> OrmResult<String> {
    let column = set_column(column)?;
    Ok(match value {
        Assign::Value(param) => format!("{column} = {}", params.placeholder(param)),
        Assign::Expr(expr) => format!("{column} = {}", expr.build(scope, params)?),
        Assign::Increment(param) => format!("{column} = {column} + {}", params.placeholder(param)),
        Assign::Decrement(param) => format!("{column} = {column} - {}", params.placeholder(param)),
    })
}

fn assignments(data: &Data, scope: &str, params: &mut ParamList) -> OrmResult<Vec<String>> {
    data.values
        .iter()
        .map(|(column, value)| assignment(column, value, scope, params))
        .collect()
}

fn push_returning(sql: &mut String, query: &Query, scope: &str) -> OrmResult<()> {
    if query.returning.is_empty() {
        return Ok(());
    }
    let columns = query
        .returning
        .iter()
        .map(|c| match c.as_str() {
            "*" => Ok("*".to_string()),
            column => quote_column(scope, column),
        })
        .collect::<OrmResult<Vec<_>>>()?;
    sql.push_str(" RETURNING ");
    sql.push_str(&columns.join(", "));
    Ok(())
}

fn write_insert(query: &Query, params: &mut ParamList) -> OrmResult<String> {
    let table = target(query)?;
    let scope = query.scope();
    if query.rows.is_empty() {
        return Err(OrmError::build(format!("insert into {} has no rows", table.name())));
    }
    if query.rows.iter().any(|row| !row.related.is_empty()) {
        return Err(OrmError::build(format!(
            "insert into {} carries nested relation data; use Table::create",
            table.name()
        )));
    }

    let mut columns: Vec<&str> = Vec::new();
    for row in &query.rows {
        for column in row.columns() {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
    }
    for column in query.defaults.keys() {
        if !columns.contains(&column.as_str()) {
            columns.push(column);
        }
    }

    let mut sql = format!("INSERT INTO {}", table_ref(query)?);
    if columns.is_empty() {
        if query.rows.len() > 1 {
            return Err(OrmError::build(format!(
                "insert of several empty rows into {}",
                table.name()
            )));
        }
        sql.push_str(" DEFAULT VALUES");
    } else {
        let quoted = columns
            .iter()
            .map(|c| set_column(c))
            .collect::<OrmResult<Vec<_>>>()?;
        sql.push_str(&format!(" ({}) VALUES ", quoted.join(", ")));

        let mut tuples = Vec::with_capacity(query.rows.len());
        for row in &query.rows {
            let mut values = Vec::with_capacity(columns.len());
            for column in &columns {
                values.push(match (row.get(column), query.defaults.get(*column)) {
                    (Some(Assign::Value(param)), _) => params.placeholder(param),
                    (Some(Assign::Expr(expr)), _) => expr.build(&scope, params)?,
                    (Some(Assign::Increment(_) | Assign::Decrement(_)), _) => {
                        return Err(OrmError::build(format!(
                            "increment of {column} is only valid in UPDATE"
                        )));
                    }
                    (None, Some(param)) => params.placeholder(param),
                    (None, None) => "DEFAULT".to_string(),
                });
            }
            tuples.push(format!("({})", values.join(", ")));
        }
        sql.push_str(&tuples.join(", "));
    }

    if let Some(conflict) = &query.on_conflict {
        sql.push_str(" ON CONFLICT");
        if !conflict.target.is_empty() {
            let target = conflict
                .target
                .iter()
                .map(|c| set_column(c))
                .collect::<OrmResult<Vec<_>>>()?;
            sql.push_str(&format!(" ({})", target.join(", ")));
        }
        let updates = match &conflict.action {
            ConflictAction::DoNothing => Vec::new(),
            ConflictAction::Merge(merge) => {
                let merge: Vec<&str> = if merge.is_empty() {
                    columns
                        .iter()
                        .copied()
                        .filter(|c| !conflict.target.iter().any(|t| t == c))
                        .collect()
                } else {
                    merge.iter().map(String::as_str).collect()
                };
                merge
                    .into_iter()
                    .map(|c| set_column(c).map(|q| format!("{q} = excluded.{q}")))
                    .collect::<OrmResult<Vec<_>>>()?
            }
            ConflictAction::Set(data) => assignments(data, &scope, params)?,
        };
        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            if conflict.target.is_empty() {
                return Err(OrmError::build("ON CONFLICT DO UPDATE needs a conflict target"));
            }
            sql.push_str(" DO UPDATE SET ");
            sql.push_str(&updates.join(", "));
        }
    }

    push_returning(&mut sql, query, &scope)?;
    Ok(sql)
}

/// Whether a trusted SET fragment already assigns `column`.
///
/// A plain text match on `"column" =`; it does not parse SQL.
fn assigns_column(fragment: &str, column: &str) -> OrmResult<bool> {
    let pattern = Regex::new(&format!(r#""?{}"?\s*="#, regex::escape(column)))
        .map_err(|e| OrmError::build(e.to_string()))?;
    Ok(pattern.is_match(fragment))
}

fn write_update(query: &Query, params: &mut ParamList) -> OrmResult<String> {
    let table = target(query)?;
    let scope = query.scope();

    let mut sets = assignments(&query.set, &scope, params)?;
    for fragment in &query.set_sql {
        sets.push(fragment.build(&scope, params)?);
    }
    if sets.is_empty() {
        return Err(OrmError::build(format!("update of {} has no assignments", table.name())));
    }
    if let Some(column) = table.updated_at_column() {
        let mut touched = query.set.contains(column);
        for fragment in &query.set_sql {
            if touched {
                break;
            }
            if let Some(text) = fragment.literal_text() {
                touched = assigns_column(text, column)?;
            }
        }
        if !touched {
            sets.push(format!("{} = now()", quote(column)));
        }
    }

    let mut sql = format!("UPDATE {} SET {}", table_ref(query)?, sets.join(", "));
    push_join_sources(&mut sql, " FROM ", &query.joins, params)?;
    push_guarded_where(&mut sql, query, &scope, params, "update")?;
    push_returning(&mut sql, query, &scope)?;
    Ok(sql)
}

fn write_delete(query: &Query, params: &mut ParamList) -> OrmResult<String> {
    let scope = query.scope();
    let mut sql = format!("DELETE FROM {}", table_ref(query)?);
    push_join_sources(&mut sql, " USING ", &query.joins, params)?;
    push_guarded_where(&mut sql, query, &scope, params, "delete")?;
    push_returning(&mut sql, query, &scope)?;
    Ok(sql)
}

/// Joined tables of UPDATE/DELETE as a comma list; their conditions move to WHERE.
fn push_join_sources(
    sql: &mut String,
    keyword: &str,
    joins: &[Join],
    params: &mut ParamList,
) -> OrmResult<()> {
    if joins.is_empty() {
        return Ok(());
    }
    let mut sources = Vec::with_capacity(joins.len());
    for join in joins {
        sources.push(join_target(&join.target, params)?);
    }
    sql.push_str(keyword);
    sql.push_str(&sources.join(", "));
    Ok(())
}

fn push_guarded_where(
    sql: &mut String,
    query: &Query,
    scope: &str,
    params: &mut ParamList,
    statement: &str,
) -> OrmResult<()> {
    let mut conds: Vec<Expr> = query
        .joins
        .iter()
        .map(|join| Expr::within(join.target.scope(), join.on.clone()))
        .collect();
    conds.extend(query.filters.iter().cloned());

    if !push_predicate(sql, " WHERE ", &conds, scope, params)? && !query.all_rows {
        return Err(OrmError::build(format!(
            "{statement} of {} without WHERE; call all_rows() to allow it",
            target(query)?.name()
        )));
    }
    Ok(())
}

fn write_truncate(query: &Query) -> OrmResult<String> {
    let mut sql = format!("TRUNCATE {}", quote_table(target(query)?.name())?);
    if query.truncate.restart_identity {
        sql.push_str(" RESTART IDENTITY");
    }
    if query.truncate.cascade {
        sql.push_str(" CASCADE");
    }
    Ok(sql)
}
