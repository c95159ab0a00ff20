//! Relation definitions and the conditions they compile to.
//!
//! A relation is declared on its source table and links it to a target table
//! either directly through key columns or transitively through another
//! relation. Each relation yields:
//!
//! - a correlated condition (`join_condition`) for `JOIN ... ON`,
//!   `EXISTS (...)` filters and correlated sub-selects,
//! - a bound condition for the accessor query of one concrete parent row,
//! - nested-create wiring for [`Table::create`].

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::adapter::Adapter;
use crate::error::{OrmError, OrmResult};
use crate::qb::{Data, Expr, InsertBuilder, Param, Query, SelectItem};
use crate::result::ResultMode;
use crate::schema::{Schema, Table, TableDef};
use crate::transaction::Executor;
use crate::value::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
}

/// Names the intermediate relation (on the source table) and the relation
/// of the intermediate table that reaches the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Through {
    pub through: String,
    pub source: String,
}

/// A declared link between two tables.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    /// Target table name; resolved at schema build time for through relations.
    pub target: String,
    /// Columns of the source table, paired positionally with `related_keys`.
    pub own_keys: Vec<String>,
    /// Columns of the target table.
    pub related_keys: Vec<String>,
    pub through: Option<Through>,
    /// Extra predicate on the target rows.
    pub scope: Option<Expr>,
}

impl RelationDef {
    fn direct(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            own_keys: Vec::new(),
            related_keys: Vec::new(),
            through: None,
            scope: None,
        }
    }

    fn via(
        name: impl Into<String>,
        kind: RelationKind,
        through: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            through: Some(Through {
                through: through.into(),
                source: source.into(),
            }),
            ..Self::direct(name, kind, String::new())
        }
    }

    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::direct(name, RelationKind::BelongsTo, target)
    }

    pub fn has_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::direct(name, RelationKind::HasOne, target)
    }

    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::direct(name, RelationKind::HasMany, target)
    }

    pub fn has_one_through(
        name: impl Into<String>,
        through: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::via(name, RelationKind::HasOne, through, source)
    }

    pub fn has_many_through(
        name: impl Into<String>,
        through: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::via(name, RelationKind::HasMany, through, source)
    }

    /// The referencing column: on the source for `belongsTo`, on the target otherwise.
    pub fn foreign_key(self, column: impl Into<String>) -> Self {
        self.foreign_keys([column.into()])
    }

    pub fn foreign_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        match self.kind {
            RelationKind::BelongsTo => self.own_keys = columns,
            RelationKind::HasOne | RelationKind::HasMany => self.related_keys = columns,
        }
        self
    }

    /// The referenced column: on the target for `belongsTo`, on the source otherwise.
    pub fn primary_key(self, column: impl Into<String>) -> Self {
        self.primary_keys([column.into()])
    }

    pub fn primary_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        match self.kind {
            RelationKind::BelongsTo => self.related_keys = columns,
            RelationKind::HasOne | RelationKind::HasMany => self.own_keys = columns,
        }
        self
    }

    /// Restrict target rows; bare columns refer to the target table.
    pub fn scope(mut self, expr: Expr) -> Self {
        self.scope = Some(expr);
        self
    }

    pub fn is_many(&self) -> bool {
        self.kind == RelationKind::HasMany
    }
}

fn and_all(mut conds: Vec<Expr>) -> Expr {
    if conds.len() == 1 {
        conds.remove(0)
    } else {
        Expr::And(conds)
    }
}

/// `SELECT 1 FROM <table> WHERE <conds> LIMIT 1`
fn exists_subquery(table: &Arc<TableDef>, alias: Option<String>, conds: Vec<Expr>) -> Query {
    let mut query = Query::for_table(None, Arc::clone(table));
    query.alias = alias;
    query.select.push(SelectItem::Expr {
        expr: Expr::raw("1"),
        alias: None,
    });
    query.filters = conds;
    query.take = true;
    query
}

/// Correlate `source_scope` rows of `source` with `target_scope` rows of the
/// relation target. Through relations nest one `EXISTS` per hop.
pub(crate) fn join_condition(
    schema: &Schema,
    source: &TableDef,
    source_scope: &str,
    rel: &RelationDef,
    target_scope: &str,
) -> OrmResult<Expr> {
    let Some(through) = &rel.through else {
        let mut conds: Vec<Expr> = rel
            .own_keys
            .iter()
            .zip(&rel.related_keys)
            .map(|(own, related)| {
                Expr::columns_eq(
                    format!("{target_scope}.{related}"),
                    format!("{source_scope}.{own}"),
                )
            })
            .collect();
        if let Some(scope) = &rel.scope {
            conds.push(Expr::within(target_scope, scope.clone()));
        }
        return Ok(and_all(conds));
    };

    let via = source.relation_def(&through.through)?;
    let intermediate = schema.table_def(&via.target)?;
    let hop = intermediate.relation_def(&through.source)?;
    let mid_scope = intermediate.scope();

    let to_target = join_condition(schema, intermediate, &mid_scope, hop, target_scope)?;
    let to_source = join_condition(schema, source, source_scope, via, &mid_scope)?;
    Ok(Expr::exists(exists_subquery(
        intermediate,
        None,
        vec![to_target, to_source],
    )))
}

/// Like [`join_condition`], but bound to key values of one concrete source row.
fn bound_condition(
    schema: &Schema,
    source: &TableDef,
    rel: &RelationDef,
    target_scope: &str,
    row: &Record,
) -> OrmResult<Expr> {
    let Some(through) = &rel.through else {
        let mut conds = Vec::with_capacity(rel.own_keys.len() + 1);
        for (own, related) in rel.own_keys.iter().zip(&rel.related_keys) {
            let value = row.get(own).cloned().ok_or_else(|| {
                OrmError::build(format!(
                    "{} row is missing key {own:?} for relation {}",
                    source.name(),
                    rel.name
                ))
            })?;
            conds.push(Expr::eq_param(
                format!("{target_scope}.{related}"),
                Param::cell(value),
            ));
        }
        if let Some(scope) = &rel.scope {
            conds.push(Expr::within(target_scope, scope.clone()));
        }
        return Ok(and_all(conds));
    };

    let via = source.relation_def(&through.through)?;
    let intermediate = schema.table_def(&via.target)?;
    let hop = intermediate.relation_def(&through.source)?;
    let mid_scope = intermediate.scope();

    let to_target = join_condition(schema, intermediate, &mid_scope, hop, target_scope)?;
    let to_source = bound_condition(schema, source, via, &mid_scope, row)?;
    Ok(Expr::exists(exists_subquery(
        intermediate,
        None,
        vec![to_target, to_source],
    )))
}

/// A relation of the table a descriptor targets, resolved against its schema.
pub(crate) struct ResolvedRelation {
    pub schema: Arc<Schema>,
    pub source: Arc<TableDef>,
    pub rel: RelationDef,
    pub target: Arc<TableDef>,
    /// Scope of the target rows; the relation name when the target is the source table.
    pub target_scope: String,
}

impl ResolvedRelation {
    pub fn resolve(query: &Query, name: &str) -> OrmResult<Self> {
        let (Some(schema), Some(source)) = (&query.schema, &query.table) else {
            return Err(OrmError::build(format!(
                "relation {name:?} needs a query built from a declared table"
            )));
        };
        let rel = source.relation_def(name)?.clone();
        let target = Arc::clone(schema.table_def(&rel.target)?);
        let target_scope = if target.scope() == query.scope() {
            rel.name.clone()
        } else {
            target.scope()
        };
        Ok(Self {
            schema: Arc::clone(schema),
            source: Arc::clone(source),
            rel,
            target,
            target_scope,
        })
    }

    fn alias(&self) -> Option<String> {
        (self.target_scope != self.target.scope()).then(|| self.target_scope.clone())
    }

    /// Correlated condition against rows of `source_scope`.
    pub fn condition(&self, source_scope: &str) -> OrmResult<Expr> {
        join_condition(
            &self.schema,
            &self.source,
            source_scope,
            &self.rel,
            &self.target_scope,
        )
    }

    /// `EXISTS (SELECT 1 FROM <target> WHERE <correlation> LIMIT 1)`
    pub fn exists(&self, source_scope: &str) -> OrmResult<Expr> {
        let cond = self.condition(source_scope)?;
        Ok(Expr::exists(exists_subquery(
            &self.target,
            self.alias(),
            vec![cond],
        )))
    }

    /// Target query correlated with `source_scope`, shaped by the relation's cardinality.
    pub fn subquery(&self, source_scope: &str) -> OrmResult<Query> {
        let mut query = Query::for_table(Some(Arc::clone(&self.schema)), Arc::clone(&self.target));
        query.alias = self.alias();
        query.filters.push(self.condition(source_scope)?);
        if !self.rel.is_many() {
            query.apply_mode(ResultMode::OneOptional);
        }
        Ok(query)
    }

    /// Join target and ON condition.
    pub fn join_target(&self, source_scope: &str) -> OrmResult<(String, Option<String>, Expr)> {
        Ok((
            self.target.name().to_string(),
            self.alias(),
            self.condition(source_scope)?,
        ))
    }
}

impl Table {
    /// Query for the rows related to one concrete `row` of this table.
    ///
    /// `row` only needs the key fields the relation reads. `hasMany`
    /// relations return all rows; the others at most one.
    pub fn related<R: Serialize + ?Sized>(&self, name: &str, row: &R) -> OrmResult<Query> {
        let rel = self.def.relation_def(name)?;
        let target = self.sibling(&rel.target)?;
        let Value::Object(row) = serde_json::to_value(row)? else {
            return Err(OrmError::build("relation accessor expects an object row"));
        };

        let mut query = target.query();
        query.filters.push(bound_condition(
            &self.schema,
            &self.def,
            rel,
            &target.def.scope(),
            &row,
        )?);
        query.apply_mode(if rel.is_many() {
            ResultMode::All
        } else {
            ResultMode::OneOptional
        });
        Ok(query)
    }

    /// The reusable correlated sub-query of a relation: parent rows are
    /// referenced by table name, not by bound value.
    pub fn join_query(&self, name: &str) -> OrmResult<Query> {
        let resolved = ResolvedRelation::resolve(&self.query(), name)?;
        let cond = resolved.condition(&self.def.scope())?;
        Ok(exists_subquery(&resolved.target, resolved.alias(), vec![cond]))
    }

    /// `INSERT ... RETURNING *` for one row, shaped as a single record.
    pub fn create_query(&self, data: Data) -> Query {
        self.query().create(data)
    }

    /// Insert a row together with any nested relation payloads.
    ///
    /// `belongsTo` payloads are inserted first and their keys copied into the
    /// row; `hasOne`/`hasMany` payloads are inserted after it with the new
    /// row's keys. With nested payloads everything runs in one transaction.
    /// Created related records are attached to the result under the relation
    /// name.
    pub async fn create<E: Executor>(&self, db: &E, data: Data) -> OrmResult<Record> {
        if data.related.is_empty() {
            return self.create_query(data).exec(db).await?.into_record();
        }
        let table = self.clone();
        db.ensure_transaction(move |tx| async move { table.create_nested(&tx, data).await })
            .await
    }

    fn create_nested<'a, A: Adapter>(
        &'a self,
        db: &'a A,
        data: Data,
    ) -> BoxFuture<'a, OrmResult<Record>> {
        Box::pin(async move {
            let Data { values, related } = data;
            let mut row = Data {
                values,
                related: Vec::new(),
            };

            let mut parents = Vec::new();
            let mut children = Vec::new();
            for (name, rows) in related {
                let rel = self.def.relation_def(&name)?.clone();
                if rel.through.is_some() {
                    return Err(OrmError::build(format!(
                        "cannot create through relation {}.{name}",
                        self.name()
                    )));
                }
                match rel.kind {
                    RelationKind::BelongsTo => parents.push((rel, rows)),
                    RelationKind::HasOne if rows.len() > 1 => {
                        return Err(OrmError::build(format!(
                            "hasOne relation {} takes at most one row",
                            rel.name
                        )));
                    }
                    RelationKind::HasOne | RelationKind::HasMany => children.push((rel, rows)),
                }
            }

            let mut attached = Record::new();
            for (rel, rows) in parents {
                let Ok([parent]) = <[Data; 1]>::try_from(rows) else {
                    return Err(OrmError::build(format!(
                        "belongsTo relation {} takes exactly one row",
                        rel.name
                    )));
                };
                let target = self.sibling(&rel.target)?;
                let created = target.create_nested(db, parent).await?;
                for (own, related) in rel.own_keys.iter().zip(&rel.related_keys) {
                    let key = key_of(&created, related, &rel)?;
                    row = row.set_param(own.clone(), Param::cell(key));
                }
                attached.insert(rel.name.clone(), Value::Object(created));
            }

            let mut record = self.create_query(row).exec(db).await?.into_record()?;

            for (rel, rows) in children {
                let target = self.sibling(&rel.target)?;
                let mut created = Vec::with_capacity(rows.len());
                for mut child in rows {
                    for (own, related) in rel.own_keys.iter().zip(&rel.related_keys) {
                        let key = key_of(&record, own, &rel)?;
                        child = child.set_param(related.clone(), Param::cell(key));
                    }
                    created.push(Value::Object(target.create_nested(db, child).await?));
                }
                let value = if rel.is_many() {
                    Value::Array(created)
                } else {
                    created.into_iter().next().unwrap_or(Value::Null)
                };
                attached.insert(rel.name.clone(), value);
            }

            record.extend(attached);
            Ok(record)
        })
    }
}

fn key_of(record: &Record, column: &str, rel: &RelationDef) -> OrmResult<Value> {
    record.get(column).cloned().ok_or_else(|| {
        OrmError::build(format!(
            "created row lacks key {column:?} needed by relation {}",
            rel.name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qb::WhereBuilder;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Schema::builder()
            .table(
                TableDef::new("user")
                    .has_one("profile", "profile", "userId")
                    .has_many("posts", "post", "authorId")
                    .has_many_through("comments", "posts", "comments")
                    .belongs_to("manager", "user", "managerId"),
            )
            .table(TableDef::new("profile").belongs_to("user", "user", "userId"))
            .table(
                TableDef::new("post")
                    .has_many("comments", "comment", "postId")
                    .relation(
                        RelationDef::has_many("published", "comment")
                            .foreign_key("postId")
                            .scope(Expr::eq("approved", true)),
                    ),
            )
            .table(TableDef::new("comment"))
            .build()
            .unwrap()
    }

    #[test]
    fn accessor_binds_parent_key() {
        let users = schema().table("user").unwrap();
        let q = users.related("profile", &json!({"id": 7})).unwrap();
        let compiled = q.to_sql().unwrap();
        assert_eq!(
            compiled.text,
            r#"SELECT * FROM "profile" WHERE "profile"."userId" = $1 LIMIT 1"#
        );
        assert_eq!(compiled.params.debug_strings(), vec!["7"]);
        assert_eq!(q.mode(), ResultMode::OneOptional);
    }

    #[test]
    fn belongs_to_accessor_reads_foreign_key() {
        let profiles = schema().table("profile").unwrap();
        let q = profiles.related("user", &json!({"userId": 3})).unwrap();
        assert_eq!(
            q.to_sql().unwrap().text,
            r#"SELECT * FROM "user" WHERE "user"."id" = $1 LIMIT 1"#
        );
    }

    #[test]
    fn accessor_requires_key_field() {
        let users = schema().table("user").unwrap();
        assert!(users.related("posts", &json!({"name": "x"})).unwrap_err().is_build());
    }

    #[test]
    fn through_accessor_uses_exists() {
        let users = schema().table("user").unwrap();
        let q = users.related("comments", &json!({"id": 1})).unwrap();
        assert_eq!(q.mode(), ResultMode::All);
        assert_eq!(
            q.to_sql().unwrap().text,
            concat!(
                r#"SELECT * FROM "comment" WHERE EXISTS (SELECT 1 FROM "post" "#,
                r#"WHERE "comment"."postId" = "post"."id" AND "post"."authorId" = $1 LIMIT 1)"#
            )
        );
    }

    #[test]
    fn join_query_references_parent_by_name() {
        let users = schema().table("user").unwrap();
        let q = users.join_query("profile").unwrap();
        let compiled = q.to_sql().unwrap();
        assert_eq!(
            compiled.text,
            r#"SELECT 1 FROM "profile" WHERE "profile"."userId" = "user"."id" LIMIT 1"#
        );
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn scoped_relation_adds_target_predicate() {
        let posts = schema().table("post").unwrap();
        let q = posts.query().where_exists("published").unwrap();
        assert_eq!(
            q.to_sql().unwrap().text,
            concat!(
                r#"SELECT * FROM "post" WHERE EXISTS (SELECT 1 FROM "comment" "#,
                r#"WHERE "comment"."postId" = "post"."id" AND "comment"."approved" = $1 LIMIT 1)"#
            )
        );
    }

    #[test]
    fn self_relation_is_aliased() {
        let users = schema().table("user").unwrap();
        let q = users.query().where_exists("manager").unwrap();
        assert_eq!(
            q.to_sql().unwrap().text,
            concat!(
                r#"SELECT * FROM "user" WHERE EXISTS (SELECT 1 FROM "user" AS "manager" "#,
                r#"WHERE "manager"."id" = "user"."managerId" LIMIT 1)"#
            )
        );
    }
}
