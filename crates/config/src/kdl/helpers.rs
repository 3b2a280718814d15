//! Small accessors over KDL nodes.
//!
//! Settings are written as child nodes with a single argument
//! (`hostname "node-a"`), so most lookups find a named child and read its
//! first positional entry.

use anyhow::Result;

/// First positional (unnamed) argument of a node, if it is a string
pub fn get_first_arg_string(node: &::kdl::KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|value| value.as_string())
        .map(str::to_string)
}

/// String value of the child node `name`
pub fn get_string_entry(node: &::kdl::KdlNode, name: &str) -> Option<String> {
    child(node, name).and_then(get_first_arg_string)
}

/// Integer value of the child node `name`
pub fn get_int_entry(node: &::kdl::KdlNode, name: &str) -> Option<i128> {
    child(node, name)
        .and_then(first_arg)
        .and_then(|value| value.as_integer())
}

/// Non-negative integer value of the child node `name`
///
/// Errors when the entry is present but negative or out of range for `T`.
pub fn get_unsigned_entry<T>(node: &::kdl::KdlNode, name: &str) -> Result<Option<T>>
where
    T: TryFrom<i128>,
{
    match get_int_entry(node, name) {
        None => Ok(None),
        Some(value) => T::try_from(value).map(Some).map_err(|_| {
            anyhow::anyhow!(
                "'{}' in block '{}' must be a non-negative integer in range, got {}",
                name,
                node.name().value(),
                value
            )
        }),
    }
}

/// Child nodes of `node` named `name`, in document order
pub fn children_named<'a>(
    node: &'a ::kdl::KdlNode,
    name: &'a str,
) -> impl Iterator<Item = &'a ::kdl::KdlNode> + 'a {
    node.children()
        .into_iter()
        .flat_map(|doc| doc.nodes().iter())
        .filter(move |child| child.name().value() == name)
}

fn child<'a>(node: &'a ::kdl::KdlNode, name: &str) -> Option<&'a ::kdl::KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

fn first_arg(node: &::kdl::KdlNode) -> Option<&::kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}
