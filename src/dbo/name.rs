use std::fmt;

/// Identifies a database object. Names double as lock resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Name {
    /// A schema, e.g. `warren`.
    Schema(String),
    /// An entity inside a schema, e.g. `warren.rabbits`.
    Entity { schema: String, entity: String },
}

impl Name {
    pub fn schema(schema: impl Into<String>) -> Self {
        Name::Schema(schema.into().to_lowercase())
    }

    pub fn entity(schema: impl Into<String>, entity: impl Into<String>) -> Self {
        Name::Entity {
            schema: schema.into().to_lowercase(),
            entity: entity.into().to_lowercase(),
        }
    }

    /// The object this one lives in, if any.
    pub fn parent(&self) -> Option<Name> {
        match self {
            Name::Schema(_) => None,
            Name::Entity { schema, .. } => Some(Name::Schema(schema.clone())),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Schema(schema) => write!(f, "{}", schema),
            Name::Entity { schema, entity } => write!(f, "{}.{}", schema, entity),
        }
    }
}
