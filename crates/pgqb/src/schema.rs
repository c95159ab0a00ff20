//! Table and relation declarations.
//!
//! A [`Schema`] is assembled once through [`SchemaBuilder`], validated, and
//! shared behind an `Arc` by every query built against it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{DbError, OrmError, OrmResult};
use crate::qb::{ColumnParser, Query};
use crate::relation::{RelationDef, RelationKind};

/// Last segment of a possibly schema-qualified table name.
pub(crate) fn scope_of(name: &str) -> String {
    crate::ident::Ident::parse(name)
        .map(|ident| ident.last().to_string())
        .unwrap_or_else(|_| name.to_string())
}

/// A declared unique constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// Static metadata for one table.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub(crate) name: String,
    pub(crate) primary_key: Vec<String>,
    pub(crate) updated_at: Option<String>,
    pub(crate) unique: Vec<UniqueConstraint>,
    pub(crate) parsers: BTreeMap<String, ColumnParser>,
    pub(crate) relations: Vec<RelationDef>,
}

impl TableDef {
    /// Declare a table with primary key `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: vec!["id".to_string()],
            updated_at: None,
            unique: Vec::new(),
            parsers: BTreeMap::new(),
            relations: Vec::new(),
        }
    }

    /// Replace the primary key columns (declaration order matters for `find`).
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Track `"updatedAt"` on every update.
    pub fn timestamps(self) -> Self {
        self.updated_at("updatedAt")
    }

    /// Track `"updated_at"` on every update.
    pub fn timestamps_snake_case(self) -> Self {
        self.updated_at("updated_at")
    }

    /// Track a custom column on every update.
    pub fn updated_at(mut self, column: impl Into<String>) -> Self {
        self.updated_at = Some(column.into());
        self
    }

    /// Declare a unique constraint by name so conflicts report its columns.
    pub fn unique<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(UniqueConstraint {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Transform a column's value whenever records of this table are returned.
    pub fn parser(
        mut self,
        column: impl Into<String>,
        f: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.parsers.insert(column.into(), ColumnParser::new(f));
        self
    }

    /// Add a relation definition.
    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// `belongsTo`: this table holds `foreign_key` pointing at `target`'s primary key.
    pub fn belongs_to(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(RelationDef::belongs_to(name, target).foreign_key(foreign_key))
    }

    /// `hasOne`: `target` holds `foreign_key` pointing at this table's primary key.
    pub fn has_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(RelationDef::has_one(name, target).foreign_key(foreign_key))
    }

    /// `hasMany`: rows of `target` hold `foreign_key` pointing at this table's primary key.
    pub fn has_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relation(RelationDef::has_many(name, target).foreign_key(foreign_key))
    }

    /// `hasOne` through another relation of this table.
    pub fn has_one_through(
        self,
        name: impl Into<String>,
        through: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.relation(RelationDef::has_one_through(name, through, source))
    }

    /// `hasMany` through another relation of this table.
    pub fn has_many_through(
        self,
        name: impl Into<String>,
        through: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.relation(RelationDef::has_many_through(name, through, source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_key
    }

    pub fn updated_at_column(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    /// Scope name bare columns are qualified with.
    pub fn scope(&self) -> String {
        scope_of(&self.name)
    }

    pub fn relation_def(&self, name: &str) -> OrmResult<&RelationDef> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| OrmError::build(format!("table {} has no relation {name:?}", self.name)))
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Map a unique (23505) or foreign key (23503) violation to a conflict error.
    pub(crate) fn conflict(&self, db: &DbError) -> OrmError {
        let constraint = db.constraint.clone().unwrap_or_default();
        let pkey = format!("{}_pkey", self.scope());
        let columns = self
            .unique
            .iter()
            .find(|u| u.name == constraint)
            .map(|u| u.columns.clone())
            .or_else(|| (constraint == pkey).then(|| self.primary_key.clone()))
            .unwrap_or_else(|| db.detail_columns());

        OrmError::Conflict {
            table: self.name.clone(),
            constraint,
            columns,
            is_unique: db.code == "23505",
            message: db.message.clone(),
        }
    }
}

/// A validated set of table definitions.
#[derive(Debug, Default)]
pub struct Schema {
    tables: BTreeMap<String, Arc<TableDef>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn table_def(&self, name: &str) -> OrmResult<&Arc<TableDef>> {
        self.tables
            .get(name)
            .ok_or_else(|| OrmError::build(format!("unknown table {name:?}")))
    }

    /// Handle for querying a declared table.
    pub fn table(self: &Arc<Self>, name: &str) -> OrmResult<Table> {
        Ok(Table {
            schema: Arc::clone(self),
            def: Arc::clone(self.table_def(name)?),
        })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// Collects table definitions and validates their relations.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<TableDef>,
}

impl SchemaBuilder {
    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// Validate relation targets and fill in default keys.
    ///
    /// `belongsTo` related keys default to the target's primary key, `hasOne`
    /// and `hasMany` own keys to this table's primary key. Through relations
    /// take their target from the source relation of the intermediate table.
    pub fn build(self) -> OrmResult<Arc<Schema>> {
        let mut tables: BTreeMap<String, TableDef> = BTreeMap::new();
        for table in self.tables {
            if tables.contains_key(&table.name) {
                return Err(OrmError::build(format!("table {:?} declared twice", table.name)));
            }
            tables.insert(table.name.clone(), table);
        }

        let primary_keys: BTreeMap<String, Vec<String>> = tables
            .iter()
            .map(|(name, t)| (name.clone(), t.primary_key.clone()))
            .collect();

        for table in tables.values_mut() {
            let own_pk = table.primary_key.clone();
            for rel in &mut table.relations {
                if rel.through.is_some() {
                    continue;
                }
                let target_pk = primary_keys.get(&rel.target).ok_or_else(|| {
                    OrmError::build(format!(
                        "relation {}.{} targets unknown table {:?}",
                        table.name, rel.name, rel.target
                    ))
                })?;
                match rel.kind {
                    RelationKind::BelongsTo => {
                        if rel.own_keys.is_empty() {
                            rel.own_keys = vec![format!("{}Id", rel.name)];
                        }
                        if rel.related_keys.is_empty() {
                            rel.related_keys = target_pk.clone();
                        }
                    }
                    RelationKind::HasOne | RelationKind::HasMany => {
                        if rel.own_keys.is_empty() {
                            rel.own_keys = own_pk.clone();
                        }
                        if rel.related_keys.is_empty() {
                            return Err(OrmError::build(format!(
                                "relation {}.{} needs a foreign key",
                                table.name, rel.name
                            )));
                        }
                    }
                }
                if rel.own_keys.len() != rel.related_keys.len() {
                    return Err(OrmError::build(format!(
                        "relation {}.{} pairs {} own keys with {} related keys",
                        table.name,
                        rel.name,
                        rel.own_keys.len(),
                        rel.related_keys.len()
                    )));
                }
            }
        }

        resolve_through_targets(&mut tables)?;

        Ok(Arc::new(Schema {
            tables: tables
                .into_iter()
                .map(|(name, table)| (name, Arc::new(table)))
                .collect(),
        }))
    }
}

/// Resolve the final target table of every through relation, one hop per pass.
fn resolve_through_targets(tables: &mut BTreeMap<String, TableDef>) -> OrmResult<()> {
    loop {
        let mut pending = Vec::new();
        let mut resolved = Vec::new();

        for table in tables.values() {
            for (idx, rel) in table.relations.iter().enumerate() {
                let Some(through) = &rel.through else { continue };
                if !rel.target.is_empty() {
                    continue;
                }
                let via = table.relation_def(&through.through)?;
                if via.through.is_some() && via.target.is_empty() {
                    pending.push((table.name.clone(), rel.name.clone()));
                    continue;
                }
                let intermediate = tables.get(&via.target).ok_or_else(|| {
                    OrmError::build(format!(
                        "relation {}.{} goes through unknown table {:?}",
                        table.name, rel.name, via.target
                    ))
                })?;
                let source = intermediate.relation_def(&through.source)?;
                if source.through.is_some() && source.target.is_empty() {
                    pending.push((table.name.clone(), rel.name.clone()));
                    continue;
                }
                resolved.push((table.name.clone(), idx, source.target.clone()));
            }
        }

        if resolved.is_empty() {
            return match pending.first() {
                None => Ok(()),
                Some((table, rel)) => Err(OrmError::build(format!(
                    "relation {table}.{rel} forms a through cycle"
                ))),
            };
        }
        for (table, idx, target) in resolved {
            if let Some(rel) = tables.get_mut(&table).and_then(|t| t.relations.get_mut(idx)) {
                rel.target = target;
            }
        }
    }
}

/// A declared table bound to its schema; the entry point for queries.
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) schema: Arc<Schema>,
    pub(crate) def: Arc<TableDef>,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &Arc<TableDef> {
        &self.def
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// A fresh select descriptor over this table.
    pub fn query(&self) -> Query {
        Query::for_table(Some(Arc::clone(&self.schema)), Arc::clone(&self.def))
    }

    pub(crate) fn sibling(&self, name: &str) -> OrmResult<Table> {
        self.schema.table(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn belongs_to_defaults_to_target_primary_key() {
        let schema = Schema::builder()
            .table(TableDef::new("user"))
            .table(TableDef::new("post").belongs_to("author", "user", "authorId"))
            .build()
            .unwrap();
        let rel = schema.table_def("post").unwrap().relation_def("author").unwrap();
        assert_eq!(rel.own_keys, vec!["authorId"]);
        assert_eq!(rel.related_keys, vec!["id"]);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let err = Schema::builder()
            .table(TableDef::new("user").has_one("profile", "profile", "userId"))
            .build()
            .unwrap_err();
        assert!(err.is_build());
    }

    #[test]
    fn through_target_is_resolved() {
        let schema = Schema::builder()
            .table(
                TableDef::new("user")
                    .has_many("posts", "post", "authorId")
                    .has_many_through("comments", "posts", "comments"),
            )
            .table(TableDef::new("post").has_many("comments", "comment", "postId"))
            .table(TableDef::new("comment"))
            .build()
            .unwrap();
        let rel = schema.table_def("user").unwrap().relation_def("comments").unwrap();
        assert_eq!(rel.target, "comment");
    }

    #[test]
    fn conflict_uses_declared_constraint_columns() {
        let table = TableDef::new("user").unique("user_email_key", ["email"]);
        let db = DbError::new("23505", "duplicate key").with_constraint("user_email_key");
        match table.conflict(&db) {
            OrmError::Conflict {
                columns, is_unique, ..
            } => {
                assert_eq!(columns, vec!["email"]);
                assert!(is_unique);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let pkey = DbError::new("23505", "duplicate key").with_constraint("user_pkey");
        assert!(matches!(table.conflict(&pkey), OrmError::Conflict { columns, .. } if columns == vec!["id"]));
    }

    #[test]
    fn conflict_falls_back_to_detail() {
        let table = TableDef::new("post");
        let db = DbError::new("23503", "violates foreign key")
            .with_constraint("post_authorId_fkey")
            .with_detail(r#"Key ("authorId")=(9) is not present in table "user"."#);
        match table.conflict(&db) {
            OrmError::Conflict {
                columns, is_unique, ..
            } => {
                assert_eq!(columns, vec!["authorId"]);
                assert!(!is_unique);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
