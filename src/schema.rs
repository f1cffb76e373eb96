//! GraphQL schema wrapper.

use apollo_compiler::Name;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;

use crate::error::SchemaError;

/// A parsed, validated GraphQL schema.
#[derive(Debug)]
pub struct Schema {
    definitions: Valid<apollo_compiler::Schema>,
}

impl Schema {
    /// Parses and validates an SDL string.
    pub fn parse(sdl: &str) -> Result<Self, SchemaError> {
        let mut parser = apollo_compiler::parser::Parser::new();
        let result = parser.parse_ast(sdl, "schema.graphql");

        // Trace log recursion limit data
        let recursion_limit = parser.recursion_reached();
        tracing::trace!(?recursion_limit, "recursion limit data");

        let definitions = result
            .map_err(|invalid| SchemaError::Parse(invalid.errors.to_string()))?
            .to_schema_validate()
            .map_err(|invalid| SchemaError::Parse(invalid.errors.to_string()))?;
        Ok(Self::new(definitions))
    }

    /// Wraps an already validated schema.
    pub fn new(definitions: Valid<apollo_compiler::Schema>) -> Self {
        Self { definitions }
    }

    pub fn definitions(&self) -> &Valid<apollo_compiler::Schema> {
        &self.definitions
    }

    /// The name of the root operation type for the given operation kind,
    /// if the schema supports that kind.
    pub(crate) fn root_operation(&self, kind: ast::OperationType) -> Option<&Name> {
        self.definitions.root_operation(kind)
    }

    pub(crate) fn type_field(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Option<&ast::FieldDefinition> {
        self.definitions
            .type_field(type_name, field_name)
            .ok()
            .map(|component| &*component.node)
    }

    pub(crate) fn get_type(&self, name: &str) -> Option<&ExtendedType> {
        self.definitions.types.get(name)
    }

    pub(crate) fn get_object(
        &self,
        name: &str,
    ) -> Option<&apollo_compiler::Node<apollo_compiler::schema::ObjectType>> {
        self.definitions.get_object(name)
    }

    /// Whether `maybe_subtype` is a member or implementer of the abstract type
    /// `abstract_type`.
    pub(crate) fn is_subtype(&self, abstract_type: &str, maybe_subtype: &str) -> bool {
        self.definitions.is_subtype(abstract_type, maybe_subtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type Query { pet: Pet }
        union Pet = Cat | Dog
        interface Named { name: String! }
        type Cat implements Named { name: String! lives: Int }
        type Dog implements Named { name: String! barks: Boolean }
    "#;

    #[test]
    fn subtype_checks() {
        let schema = Schema::parse(SDL).unwrap();
        assert!(schema.is_subtype("Pet", "Cat"));
        assert!(schema.is_subtype("Named", "Dog"));
        assert!(!schema.is_subtype("Pet", "Named"));
        assert!(!schema.is_subtype("Cat", "Cat"));
    }

    #[test]
    fn field_definition_lookup() {
        let schema = Schema::parse(SDL).unwrap();
        let lives = schema.type_field("Cat", "lives").expect("defined field");
        assert_eq!(lives.name.as_str(), "lives");
        assert_eq!(lives.ty.to_string(), "Int");
        assert!(schema.type_field("Cat", "barks").is_none());
        assert!(schema.type_field("Missing", "lives").is_none());
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let error = Schema::parse("type Query { pet: Missing }").unwrap_err();
        assert!(matches!(error, SchemaError::Parse(_)));
    }
}
