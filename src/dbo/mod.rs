/// In-memory entities holding Arrow record batches.
pub mod entity;
/// Names of database objects.
pub mod name;
/// Schemas: named collections of entities.
pub mod schema;
