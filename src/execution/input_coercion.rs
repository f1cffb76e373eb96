//! Input coercion: turning raw variable values and argument literals into
//! schema-typed values.

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::Type;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::VariableDefinition;
use apollo_compiler::parser::SourceMap;
use apollo_compiler::schema::ExtendedType;
use serde_json_bytes::Value as JsonValue;

use super::engine::LinkedPath;
use super::engine::PropagateNull;
use super::engine::field_error;
use super::engine::materialize_path;
use super::engine::node_locations;
use crate::error::GraphQLError;
use crate::error::InvalidValue;
use crate::json_ext::Object as JsonMap;
use crate::json_ext::Path;
use crate::schema::Schema;

/// Coerces the variable values of a request against the operation's variable
/// definitions.
///
/// Collects every error in one pass rather than stopping at the first, so a
/// request with several bad variables reports all of them.
pub(crate) fn coerce_variable_values(
    schema: &Schema,
    operation: &Operation,
    raw: &JsonMap,
    sources: &SourceMap,
) -> Result<JsonMap, Vec<GraphQLError>> {
    let mut coerced = JsonMap::new();
    let mut errors = Vec::new();
    for definition in &operation.variables {
        coerce_one_variable(schema, definition, raw, sources, &mut coerced, &mut errors);
    }
    if errors.is_empty() {
        Ok(coerced)
    } else {
        Err(errors)
    }
}

fn coerce_one_variable(
    schema: &Schema,
    definition: &Node<VariableDefinition>,
    raw: &JsonMap,
    sources: &SourceMap,
    coerced: &mut JsonMap,
    errors: &mut Vec<GraphQLError>,
) {
    let name = definition.name.as_str();
    let ty = &definition.ty;
    if !is_input_type(schema, ty) {
        errors.push(variable_error(
            definition,
            sources,
            format!(
                "Variable '${name}' expected value of type '{ty}' \
                 which cannot be used as an input type."
            ),
        ));
        return;
    }
    if let Some(value) = raw.get(name) {
        if value.is_null() && ty.is_non_null() {
            errors.push(variable_error(
                definition,
                sources,
                format!("Variable '${name}' of non-null type '{ty}' must not be null."),
            ));
            return;
        }
        let before = errors.len();
        if let Ok(value) = coerce_input_value(
            schema,
            definition,
            sources,
            value,
            ty,
            &mut Vec::new(),
            errors,
        ) {
            if errors.len() == before {
                coerced.insert(name, value);
            }
        }
    } else if let Some(default) = &definition.default_value {
        // Defaults are validated upstream; an inconsistent one contributes
        // no value rather than an error.
        if let Ok(value) = value_from_ast(schema, default, ty, None) {
            coerced.insert(name, value);
        }
    } else if ty.is_non_null() {
        errors.push(variable_error(
            definition,
            sources,
            format!("Variable '${name}' of required type '{ty}' was not provided."),
        ));
    }
}

/// Coerces the arguments of one field against its definition.
///
/// Unlike variable coercion this fails fast: the first bad argument is a
/// located field error, subject to null bubbling at the field's position.
#[allow(clippy::too_many_arguments)]
pub(crate) fn coerce_argument_values(
    schema: &Schema,
    sources: &SourceMap,
    variables: &JsonMap,
    errors: &mut Vec<GraphQLError>,
    base: &Path,
    path: LinkedPath<'_>,
    field_def: &ast::FieldDefinition,
    field: &Node<Field>,
) -> Result<JsonMap, PropagateNull> {
    let mut coerced = JsonMap::new();
    for arg_def in &field_def.arguments {
        let arg_name = arg_def.name.as_str();
        let arg_ty = &arg_def.ty;
        let supplied = field
            .arguments
            .iter()
            .find(|argument| argument.name == arg_def.name);
        macro_rules! argument_error {
            ($node: expr, $($message: tt)+) => {{
                errors.push(field_error(
                    format!($($message)+),
                    materialize_path(base, path),
                    node_locations($node, sources),
                ));
                return Err(PropagateNull);
            }};
        }
        let Some(argument) = supplied else {
            if let Some(default) = &arg_def.default_value {
                if let Ok(value) = value_from_ast(schema, default, arg_ty, None) {
                    coerced.insert(arg_name, value);
                }
            } else if arg_ty.is_non_null() {
                argument_error!(
                    field,
                    "Argument '{arg_name}' of required type '{arg_ty}' was not provided."
                );
            }
            continue;
        };
        match argument.value.as_ref() {
            ast::Value::Variable(var_name) => match variables.get(var_name.as_str()) {
                Some(value) if value.is_null() && arg_ty.is_non_null() => {
                    argument_error!(
                        &argument.value,
                        "Argument '{arg_name}' of non-null type '{arg_ty}' must not be null."
                    );
                }
                Some(value) => {
                    coerced.insert(arg_name, value.clone());
                }
                None => {
                    if let Some(default) = &arg_def.default_value {
                        if let Ok(value) = value_from_ast(schema, default, arg_ty, None) {
                            coerced.insert(arg_name, value);
                        }
                    } else if arg_ty.is_non_null() {
                        argument_error!(
                            &argument.value,
                            "Argument '{arg_name}' of required type '{arg_ty}' was provided \
                             the variable '${var_name}' which was not provided a runtime value."
                        );
                    }
                }
            },
            ast::Value::Null if arg_ty.is_non_null() => {
                argument_error!(
                    &argument.value,
                    "Argument '{arg_name}' of non-null type '{arg_ty}' must not be null."
                );
            }
            _ => match value_from_ast(schema, &argument.value, arg_ty, Some(variables)) {
                Ok(value) => {
                    coerced.insert(arg_name, value);
                }
                Err(InvalidValue) => {
                    argument_error!(
                        &argument.value,
                        "Argument '{arg_name}' has invalid value {}.",
                        argument.value
                    );
                }
            },
        }
    }
    Ok(coerced)
}

/// Recursive structural coercion of an already-parsed JSON value.
///
/// Errors are appended to the sink with the variable's name and the path of
/// the offending part, and coercion continues with the remaining list items
/// or input-object fields so one call reports them all.
fn coerce_input_value(
    schema: &Schema,
    definition: &Node<VariableDefinition>,
    sources: &SourceMap,
    value: &JsonValue,
    ty: &Type,
    path: &mut Vec<String>,
    errors: &mut Vec<GraphQLError>,
) -> Result<JsonValue, InvalidValue> {
    macro_rules! invalid {
        ($($message: tt)+) => {{
            errors.push(invalid_value_error(
                definition,
                sources,
                value,
                path,
                format!($($message)+),
            ));
            return Err(InvalidValue);
        }};
    }
    if value.is_null() {
        if ty.is_non_null() {
            invalid!("Expected non-nullable type '{ty}' not to be null.");
        }
        return Ok(JsonValue::Null);
    }
    let type_name = match ty {
        Type::List(inner) | Type::NonNullList(inner) => {
            return if let JsonValue::Array(items) = value {
                let mut coerced = Vec::with_capacity(items.len());
                let mut failed = false;
                for (index, item) in items.iter().enumerate() {
                    path.push(format!("[{index}]"));
                    match coerce_input_value(schema, definition, sources, item, inner, path, errors)
                    {
                        Ok(item) => coerced.push(item),
                        Err(InvalidValue) => failed = true,
                    }
                    path.pop();
                }
                if failed {
                    Err(InvalidValue)
                } else {
                    Ok(JsonValue::Array(coerced))
                }
            } else {
                // A non-list value coerces to a one-item list.
                coerce_input_value(schema, definition, sources, value, inner, path, errors)
                    .map(|item| JsonValue::Array(vec![item]))
            };
        }
        Type::Named(name) | Type::NonNullNamed(name) => name,
    };
    let Some(type_def) = schema.get_type(type_name) else {
        invalid!("Unknown type '{type_name}'.");
    };
    match type_def {
        ExtendedType::Scalar(_) => match type_name.as_str() {
            "Int" => {
                if value.as_i64().is_some_and(|int| i32::try_from(int).is_ok()) {
                    Ok(value.clone())
                } else {
                    invalid!("Int cannot represent non 32-bit signed integer value: {value}");
                }
            }
            "Float" => {
                if value.is_f64() || value.is_i64() {
                    Ok(value.clone())
                } else {
                    invalid!("Float cannot represent non numeric value: {value}");
                }
            }
            "String" => {
                if value.is_string() {
                    Ok(value.clone())
                } else {
                    invalid!("String cannot represent a non string value: {value}");
                }
            }
            "Boolean" => {
                if value.is_boolean() {
                    Ok(value.clone())
                } else {
                    invalid!("Boolean cannot represent a non boolean value: {value}");
                }
            }
            "ID" => {
                if value.is_string() || value.is_i64() {
                    Ok(value.clone())
                } else {
                    invalid!("ID cannot represent value: {value}");
                }
            }
            // Custom scalar: parsing belongs to the host, pass through.
            _ => Ok(value.clone()),
        },
        ExtendedType::Enum(enum_def) => {
            if value
                .as_str()
                .is_some_and(|name| enum_def.values.contains_key(name))
            {
                Ok(value.clone())
            } else {
                invalid!("Value {value} does not exist in '{type_name}' enum.");
            }
        }
        ExtendedType::InputObject(input_def) => {
            let JsonValue::Object(supplied) = value else {
                invalid!("Expected type '{type_name}' to be an object.");
            };
            let mut coerced = JsonMap::new();
            let mut failed = false;
            for (field_name, field_def) in &input_def.fields {
                if let Some(field_value) = supplied.get(field_name.as_str()) {
                    path.push(format!(".{field_name}"));
                    match coerce_input_value(
                        schema,
                        definition,
                        sources,
                        field_value,
                        &field_def.ty,
                        path,
                        errors,
                    ) {
                        Ok(field_value) => {
                            coerced.insert(field_name.as_str(), field_value);
                        }
                        Err(InvalidValue) => failed = true,
                    }
                    path.pop();
                } else if let Some(default) = &field_def.default_value {
                    if let Ok(default) = value_from_ast(schema, default, &field_def.ty, None) {
                        coerced.insert(field_name.as_str(), default);
                    }
                } else if field_def.ty.is_non_null() {
                    errors.push(invalid_value_error(
                        definition,
                        sources,
                        value,
                        path,
                        format!(
                            "Field '{field_name}' of required type '{}' was not provided.",
                            field_def.ty
                        ),
                    ));
                    failed = true;
                }
            }
            for key in supplied.keys() {
                if !input_def.fields.contains_key(key.as_str()) {
                    let message = match suggest(
                        key.as_str(),
                        input_def.fields.keys().map(|name| name.as_str()),
                    ) {
                        Some(suggestion) => format!(
                            "Field '{}' is not defined by type '{type_name}'. \
                             Did you mean '{suggestion}'?",
                            key.as_str()
                        ),
                        None => format!(
                            "Field '{}' is not defined by type '{type_name}'.",
                            key.as_str()
                        ),
                    };
                    errors.push(invalid_value_error(definition, sources, value, path, message));
                    failed = true;
                }
            }
            if failed {
                Err(InvalidValue)
            } else {
                Ok(JsonValue::Object(coerced))
            }
        }
        ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_) => {
            invalid!("Type '{type_name}' cannot be used as an input type.");
        }
    }
}

/// Coerces a literal AST value. Never records errors: any failure is the
/// `InvalidValue` sentinel, letting the caller decide severity.
pub(crate) fn value_from_ast(
    schema: &Schema,
    value: &Node<ast::Value>,
    ty: &Type,
    variables: Option<&JsonMap>,
) -> Result<JsonValue, InvalidValue> {
    match value.as_ref() {
        ast::Value::Variable(name) => {
            let supplied = variables.and_then(|variables| variables.get(name.as_str()));
            match supplied {
                Some(value) if value.is_null() && ty.is_non_null() => Err(InvalidValue),
                Some(value) => Ok(value.clone()),
                None if ty.is_non_null() => Err(InvalidValue),
                None => Ok(JsonValue::Null),
            }
        }
        ast::Value::Null => {
            if ty.is_non_null() {
                Err(InvalidValue)
            } else {
                Ok(JsonValue::Null)
            }
        }
        _ => match ty {
            Type::List(inner) | Type::NonNullList(inner) => {
                if let ast::Value::List(items) = value.as_ref() {
                    items
                        .iter()
                        .map(|item| value_from_ast(schema, item, inner, variables))
                        .collect::<Result<Vec<_>, _>>()
                        .map(JsonValue::Array)
                } else {
                    value_from_ast(schema, value, inner, variables)
                        .map(|item| JsonValue::Array(vec![item]))
                }
            }
            Type::Named(name) | Type::NonNullNamed(name) => {
                literal_to_named_type(schema, value, name, variables)
            }
        },
    }
}

fn literal_to_named_type(
    schema: &Schema,
    value: &Node<ast::Value>,
    type_name: &ast::NamedType,
    variables: Option<&JsonMap>,
) -> Result<JsonValue, InvalidValue> {
    let type_def = schema.get_type(type_name).ok_or(InvalidValue)?;
    match type_def {
        ExtendedType::Scalar(_) => match type_name.as_str() {
            "Int" => match value.as_ref() {
                ast::Value::Int(int) => Ok(int.try_to_i32().map_err(|_| InvalidValue)?.into()),
                _ => Err(InvalidValue),
            },
            "Float" => match value.as_ref() {
                ast::Value::Float(float) => {
                    Ok(float.try_to_f64().map_err(|_| InvalidValue)?.into())
                }
                ast::Value::Int(int) => Ok(int.try_to_f64().map_err(|_| InvalidValue)?.into()),
                _ => Err(InvalidValue),
            },
            "String" => match value.as_ref() {
                ast::Value::String(text) => Ok(text.as_str().into()),
                _ => Err(InvalidValue),
            },
            "Boolean" => match value.as_ref() {
                ast::Value::Boolean(boolean) => Ok((*boolean).into()),
                _ => Err(InvalidValue),
            },
            "ID" => match value.as_ref() {
                ast::Value::String(text) => Ok(text.as_str().into()),
                ast::Value::Int(int) => Ok(int.try_to_i32().map_err(|_| InvalidValue)?.into()),
                _ => Err(InvalidValue),
            },
            // Custom scalar: any literal passes through structurally.
            _ => untyped_literal(value, variables),
        },
        ExtendedType::Enum(enum_def) => match value.as_ref() {
            ast::Value::Enum(name) if enum_def.values.contains_key(name.as_str()) => {
                Ok(name.as_str().into())
            }
            _ => Err(InvalidValue),
        },
        ExtendedType::InputObject(input_def) => {
            let ast::Value::Object(supplied) = value.as_ref() else {
                return Err(InvalidValue);
            };
            let mut coerced = JsonMap::new();
            for (field_name, field_def) in &input_def.fields {
                let supplied_value = supplied
                    .iter()
                    .find(|(name, _)| name == field_name)
                    .map(|(_, value)| value);
                if let Some(field_value) = supplied_value {
                    let field_value =
                        value_from_ast(schema, field_value, &field_def.ty, variables)?;
                    coerced.insert(field_name.as_str(), field_value);
                } else if let Some(default) = &field_def.default_value {
                    let default = value_from_ast(schema, default, &field_def.ty, variables)?;
                    coerced.insert(field_name.as_str(), default);
                } else if field_def.ty.is_non_null() {
                    return Err(InvalidValue);
                }
            }
            for (name, _) in supplied {
                if !input_def.fields.contains_key(name.as_str()) {
                    return Err(InvalidValue);
                }
            }
            Ok(JsonValue::Object(coerced))
        }
        ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_) => {
            Err(InvalidValue)
        }
    }
}

/// Structural JSON conversion of a literal, used for custom scalar input.
fn untyped_literal(
    value: &Node<ast::Value>,
    variables: Option<&JsonMap>,
) -> Result<JsonValue, InvalidValue> {
    Ok(match value.as_ref() {
        ast::Value::Null => JsonValue::Null,
        ast::Value::Boolean(boolean) => (*boolean).into(),
        ast::Value::Int(int) => int.try_to_i32().map_err(|_| InvalidValue)?.into(),
        ast::Value::Float(float) => float.try_to_f64().map_err(|_| InvalidValue)?.into(),
        ast::Value::String(text) => text.as_str().into(),
        ast::Value::Enum(name) => name.as_str().into(),
        ast::Value::Variable(name) => variables
            .and_then(|variables| variables.get(name.as_str()))
            .cloned()
            .unwrap_or(JsonValue::Null),
        ast::Value::List(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| untyped_literal(item, variables))
                .collect::<Result<_, _>>()?,
        ),
        ast::Value::Object(fields) => {
            let mut object = JsonMap::new();
            for (name, field_value) in fields {
                object.insert(name.as_str(), untyped_literal(field_value, variables)?);
            }
            JsonValue::Object(object)
        }
    })
}

fn is_input_type(schema: &Schema, ty: &Type) -> bool {
    matches!(
        schema.get_type(ty.inner_named_type()),
        Some(ExtendedType::Scalar(_) | ExtendedType::Enum(_) | ExtendedType::InputObject(_))
    )
}

fn variable_error(
    definition: &Node<VariableDefinition>,
    sources: &SourceMap,
    message: String,
) -> GraphQLError {
    GraphQLError {
        message,
        locations: node_locations(definition, sources),
        ..Default::default()
    }
}

fn invalid_value_error(
    definition: &Node<VariableDefinition>,
    sources: &SourceMap,
    value: &JsonValue,
    path: &[String],
    reason: String,
) -> GraphQLError {
    let name = definition.name.as_str();
    let message = if path.is_empty() {
        format!("Variable '${name}' got invalid value {value}; {reason}")
    } else {
        format!(
            "Variable '${name}' got invalid value {value} at '{name}{}'; {reason}",
            path.concat()
        )
    };
    variable_error(definition, sources, message)
}

/// The closest field name within a small edit distance, for
/// "did you mean" hints on unknown input-object fields.
fn suggest<'a>(target: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .map(|candidate| (edit_distance(target, candidate), candidate))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, a_char) in a.iter().enumerate() {
        let mut previous_diagonal = row[0];
        row[0] = i + 1;
        for (j, b_char) in b.iter().enumerate() {
            let substitution = previous_diagonal + usize::from(a_char != b_char);
            previous_diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(previous_diagonal + 1);
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ExecutableDocument;
    use serde_json_bytes::json;

    use super::*;

    const SDL: &str = r#"
        type Query { echo(x: Int, point: Point, mode: Mode): String }
        input Point { x: Int! y: Int! label: String = "origin" }
        enum Mode { FAST SLOW }
    "#;

    fn coerce(query: &str, variables: JsonValue) -> Result<JsonMap, Vec<GraphQLError>> {
        let schema = crate::schema::Schema::parse(SDL).unwrap();
        let document =
            ExecutableDocument::parse_and_validate(schema.definitions(), query, "query.graphql")
                .unwrap();
        let operation = document.operations.anonymous.as_ref().unwrap();
        let raw = variables.as_object().cloned().unwrap_or_default();
        coerce_variable_values(&schema, operation, &raw, &document.sources)
    }

    #[test]
    fn missing_required_variable() {
        let errors = coerce("query ($x: Int!) { echo(x: $x) }", json!({})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "Variable '$x' of required type 'Int!' was not provided."
        );
        assert!(!errors[0].locations.is_empty());
    }

    #[test]
    fn null_for_non_null_variable() {
        let errors = coerce("query ($x: Int!) { echo(x: $x) }", json!({"x": null})).unwrap_err();
        assert_eq!(
            errors[0].message,
            "Variable '$x' of non-null type 'Int!' must not be null."
        );
    }

    #[test]
    fn multiple_variable_errors_collected_in_one_pass() {
        let errors = coerce(
            "query ($x: Int!, $mode: Mode) { echo(x: $x, mode: $mode) }",
            json!({"mode": "WARP"}),
        )
        .unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn input_object_coercion_applies_defaults_and_flags_unknowns() {
        let coerced = coerce(
            "query ($point: Point) { echo(point: $point) }",
            json!({"point": {"x": 1, "y": 2}}),
        )
        .unwrap();
        assert_eq!(
            coerced.get("point"),
            Some(&json!({"x": 1, "y": 2, "label": "origin"}))
        );

        let errors = coerce(
            "query ($point: Point) { echo(point: $point) }",
            json!({"point": {"x": 1, "y": 2, "lable": "typo"}}),
        )
        .unwrap_err();
        assert!(errors[0].message.contains("Did you mean 'label'?"));
    }

    #[test]
    fn list_singleton_wrapping() {
        let schema = crate::schema::Schema::parse("type Query { f(xs: [Int]): Int }").unwrap();
        let document = ExecutableDocument::parse_and_validate(
            schema.definitions(),
            "query ($xs: [Int]) { f(xs: $xs) }",
            "query.graphql",
        )
        .unwrap();
        let operation = document.operations.anonymous.as_ref().unwrap();
        let mut raw = JsonMap::new();
        raw.insert("xs", json!(5));
        let coerced =
            coerce_variable_values(&schema, operation, &raw, &document.sources).unwrap();
        assert_eq!(coerced.get("xs"), Some(&json!([5])));
    }

    #[test]
    fn int_range_enforced() {
        let errors = coerce(
            "query ($x: Int) { echo(x: $x) }",
            json!({"x": 2_147_483_648_i64}),
        )
        .unwrap_err();
        assert!(errors[0].message.contains("Int cannot represent"));
    }
}
