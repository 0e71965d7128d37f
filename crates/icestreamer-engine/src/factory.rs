//! Node factory.
//!
//! Creates named nodes and applies configuration-supplied properties to them.

use tracing::{debug, trace};

use icestreamer_core::{Error as ConfigError, Group, NodeKind};

use crate::engine::{MediaEngine, NodeId};
use crate::error::{EngineError, GraphError, GraphResult};

/// Property never taken from configuration; nodes are looked up by name.
const NAME_PROPERTY: &str = "name";

/// Creates nodes on behalf of the assemblies.
pub struct NodeFactory<'a, E: MediaEngine> {
    engine: &'a mut E,
}

impl<'a, E: MediaEngine> NodeFactory<'a, E> {
    #[must_use]
    pub fn new(engine: &'a mut E) -> Self {
        Self { engine }
    }

    /// Access the underlying engine.
    pub fn engine(&mut self) -> &mut E {
        self.engine
    }

    /// Create a node of `kind` named `name`.
    ///
    /// # Errors
    /// Returns [`GraphError::Factory`] if the engine cannot instantiate it.
    pub fn create(&mut self, kind: NodeKind, name: &str) -> GraphResult<NodeId> {
        let factory = kind.factory();
        let node = self.engine.create_node(factory, name).map_err(|source| GraphError::Factory {
            factory: factory.to_string(),
            source,
        })?;
        debug!(factory, name, %node, "Created node");
        Ok(node)
    }

    /// Create a node named after its kind and owning group.
    ///
    /// # Errors
    /// Returns [`GraphError::Factory`] if the engine cannot instantiate it.
    pub fn create_for_group(&mut self, kind: NodeKind, group: &str) -> GraphResult<NodeId> {
        self.create(kind, &kind.node_name(group))
    }

    /// Set a fixed property required by the graph layout.
    ///
    /// # Errors
    /// Returns [`GraphError::Engine`] if the node rejects the value.
    pub fn set(&mut self, node: NodeId, name: &str, value: &str) -> GraphResult<()> {
        self.engine.set_property(node, name, value)?;
        Ok(())
    }

    /// Apply every key of `group` that names a settable property of `node`.
    ///
    /// Keys the node does not know are ignored. Returns the number of
    /// properties applied.
    ///
    /// # Errors
    /// Returns [`GraphError::Config`] if the node rejects a value.
    pub fn apply(&mut self, node: NodeId, group: &Group) -> GraphResult<usize> {
        let mut applied = 0;

        for spec in self.engine.properties(node)? {
            if !spec.settable() || spec.name == NAME_PROPERTY {
                continue;
            }
            let Some(value) = group.get(&spec.name) else {
                continue;
            };

            trace!(%node, property = %spec.name, value, "Setting property");
            match self.engine.set_property(node, &spec.name, value) {
                Ok(()) => applied += 1,
                Err(EngineError::PropertyRejected { reason, .. }) => {
                    return Err(GraphError::Config(ConfigError::InvalidValue {
                        group: group.name().to_string(),
                        key: spec.name,
                        value: value.to_string(),
                        reason,
                    }));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use mockall::predicate::eq;

    use super::*;
    use crate::engine::{MockMediaEngine, PropertySpec};

    fn spec(name: &str, writable: bool, construct_only: bool) -> PropertySpec {
        PropertySpec { name: name.to_string(), writable, construct_only }
    }

    fn mock_with_specs() -> MockMediaEngine {
        let mut engine = MockMediaEngine::new();
        engine.expect_properties().returning(|_| {
            Ok(vec![
                spec("name", true, false),
                spec("bitrate", true, false),
                spec("quality", true, true),
                spec("current-level", false, false),
            ])
        });
        engine
    }

    #[test]
    fn test_apply_only_sets_writable_runtime_properties() {
        let mut engine = mock_with_specs();
        engine
            .expect_set_property()
            .with(eq(NodeId(1)), eq("bitrate"), eq("128000"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let group = Group::new("radio1")
            .with("bitrate", "128000")
            .with("quality", "0.4")
            .with("current-level", "3")
            .with("name", "renamed")
            .with("encoder", "vorbis");

        let applied = NodeFactory::new(&mut engine).apply(NodeId(1), &group).expect("applied");
        assert_eq!(applied, 1);
    }

    #[test]
    fn test_rejected_value_is_a_config_error() {
        let mut engine = mock_with_specs();
        engine.expect_set_property().returning(|_, property, value| {
            Err(EngineError::PropertyRejected {
                node: "vorbisenc-radio1".to_string(),
                property: property.to_string(),
                value: value.to_string(),
                reason: "not an integer".to_string(),
            })
        });

        let group = Group::new("radio1").with("bitrate", "loud");
        let result = NodeFactory::new(&mut engine).apply(NodeId(1), &group);
        assert_matches!(
            result,
            Err(GraphError::Config(ConfigError::InvalidValue { group, key, .. }))
                if group == "radio1" && key == "bitrate"
        );
    }

    #[test]
    fn test_missing_factory_is_a_factory_error() {
        let mut engine = MockMediaEngine::new();
        engine
            .expect_create_node()
            .returning(|factory, _| Err(EngineError::MissingFactory(factory.to_string())));

        let result = NodeFactory::new(&mut engine).create_for_group(NodeKind::Sender, "radio1");
        assert_matches!(result, Err(GraphError::Factory { factory, .. }) if factory == "shout2send");
    }

    #[test]
    fn test_nodes_are_named_after_kind_and_group() {
        let mut engine = MockMediaEngine::new();
        engine
            .expect_create_node()
            .with(eq("shout2send"), eq("shout2send-radio1"))
            .times(1)
            .returning(|_, _| Ok(NodeId(7)));

        let node = NodeFactory::new(&mut engine)
            .create_for_group(NodeKind::Sender, "radio1")
            .expect("created");
        assert_eq!(node, NodeId(7));
    }
}
