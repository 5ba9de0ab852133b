use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, warn};

use crate::models::descriptor::UNKNOWN_DATATYPE;
use crate::models::{
    ColumnDescriptor, ColumnNote, DescriptionDocument, ObjectDescriptor, ObjectType,
    SchemaDescriptor, ScopeMapping,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDescription {
    pub object_name: String,
    pub object_type: ObjectType,
    pub document: DescriptionDocument,
}

pub trait DescriptionStore: Send + Sync {
    fn descriptions_for(&self, database_name: &str, schema_name: &str)
    -> Result<Vec<StoredDescription>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    pub datatype: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogObject {
    pub object_name: String,
    pub object_type: ObjectType,
    pub columns: Vec<CatalogColumn>,
}

pub trait Catalog: Send + Sync {
    fn granted_objects(
        &self,
        scope: &ScopeMapping,
        include_views: bool,
        deadline: Instant,
    ) -> Result<Vec<CatalogObject>>;
}

pub struct SchemaIntrospector {
    catalog: Arc<dyn Catalog>,
    descriptions: Arc<dyn DescriptionStore>,
    include_views: bool,
}

impl SchemaIntrospector {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        descriptions: Arc<dyn DescriptionStore>,
        include_views: bool,
    ) -> Self {
        Self {
            catalog,
            descriptions,
            include_views,
        }
    }

    pub fn introspect(&self, scope: &ScopeMapping, deadline: Instant) -> SchemaDescriptor {
        let described = match self
            .descriptions
            .descriptions_for(&scope.database_name, &scope.schema_name)
        {
            Ok(described) => described,
            Err(error) => {
                warn!(
                    database = %scope.database_name,
                    schema = %scope.schema_name,
                    error = %format!("{error:#}"),
                    "description store unreadable; using catalog only"
                );
                Vec::new()
            }
        };

        match self
            .catalog
            .granted_objects(scope, self.include_views, deadline)
        {
            Ok(objects) => {
                let descriptor = merge(scope, objects, described);
                debug!(
                    role = %scope.role_name,
                    objects = descriptor.objects.len(),
                    "introspected schema"
                );
                descriptor
            }
            Err(error) => {
                warn!(
                    role = %scope.role_name,
                    database = %scope.database_name,
                    schema = %scope.schema_name,
                    error = %format!("{error:#}"),
                    "catalog unreadable; describing schema from stored descriptions only"
                );
                degraded(scope, described)
            }
        }
    }
}

#[must_use]
pub fn merge(
    scope: &ScopeMapping,
    objects: Vec<CatalogObject>,
    described: Vec<StoredDescription>,
) -> SchemaDescriptor {
    let mut by_name = described
        .into_iter()
        .map(|stored| (stored.object_name.to_ascii_lowercase(), stored.document))
        .collect::<BTreeMap<_, _>>();

    let mut descriptor = SchemaDescriptor::new(&scope.role_name, &scope.database_name, &scope.schema_name);
    for object in objects {
        let document = by_name
            .remove(&object.object_name.to_ascii_lowercase())
            .unwrap_or_default();
        let notes = lowercase_notes(&document);

        let columns = object
            .columns
            .into_iter()
            .map(|column| {
                let note = notes.get(&column.name.to_ascii_lowercase()).copied();
                let datatype = if column.datatype.trim().is_empty() {
                    note.and_then(ColumnNote::datatype)
                        .unwrap_or(UNKNOWN_DATATYPE)
                        .to_string()
                } else {
                    column.datatype
                };
                ColumnDescriptor {
                    name: column.name,
                    datatype,
                    nullable: column.nullable,
                    human_description: note.and_then(ColumnNote::description).map(str::to_string),
                    tags: note.map(ColumnNote::tags).unwrap_or_default(),
                }
            })
            .collect();

        descriptor.insert(ObjectDescriptor {
            schema_name: scope.schema_name.clone(),
            object_name: object.object_name,
            object_type: object.object_type,
            description: document.description,
            verified: true,
            columns,
        });
    }
    descriptor
}

#[must_use]
pub fn degraded(scope: &ScopeMapping, described: Vec<StoredDescription>) -> SchemaDescriptor {
    let mut descriptor = SchemaDescriptor::new(&scope.role_name, &scope.database_name, &scope.schema_name);
    descriptor.degraded = true;

    for stored in described {
        let columns = stored
            .document
            .columns
            .iter()
            .map(|(name, note)| ColumnDescriptor {
                name: name.clone(),
                datatype: note.datatype().unwrap_or(UNKNOWN_DATATYPE).to_string(),
                nullable: true,
                human_description: note.description().map(str::to_string),
                tags: note.tags(),
            })
            .collect();

        descriptor.insert(ObjectDescriptor {
            schema_name: scope.schema_name.clone(),
            object_name: stored.object_name,
            object_type: stored.object_type,
            description: stored.document.description,
            verified: false,
            columns,
        });
    }
    descriptor
}

fn lowercase_notes(document: &DescriptionDocument) -> BTreeMap<String, &ColumnNote> {
    document
        .columns
        .iter()
        .map(|(name, note)| (name.to_ascii_lowercase(), note))
        .collect()
}
