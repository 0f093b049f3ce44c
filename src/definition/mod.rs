//! Immutable flow definitions: the graph of nodes a session walks.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::actions::{Action, ActionRegistry};
use crate::assets::{Dependency, MissingCallback, SessionAssets};
use crate::error::ReadError;
use crate::routers::{read_router, Router};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Messaging,
    MessagingOffline,
    Voice,
    Background,
}

/// A typed outgoing edge from a node. No destination means the run
/// terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exit {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_uuid: Option<Uuid>,
}

/// A point in the flow: an ordered list of actions, at most one router, and
/// an ordered list of exits.
#[derive(Debug)]
pub struct Node {
    pub uuid: Uuid,
    pub actions: Vec<Box<dyn Action>>,
    pub router: Option<Router>,
    pub exits: Vec<Exit>,
}

impl Node {
    pub fn exit(&self, uuid: Uuid) -> Option<&Exit> {
        self.exits.iter().find(|e| e.uuid == uuid)
    }

    /// The wait on this node's router, if any.
    pub fn wait(&self) -> Option<&crate::waits::Wait> {
        self.router.as_ref().and_then(|r| r.wait.as_ref())
    }
}

/// Translations: language → item UUID → property → translated strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Localization(HashMap<String, HashMap<Uuid, HashMap<String, Vec<String>>>>);

impl Localization {
    /// Fetches the translated strings for an item property, trying each
    /// language in preference order. `None` falls back to the definition.
    pub fn get_texts(
        &self,
        languages: &[String],
        item_uuid: Uuid,
        property: &str,
    ) -> Option<Vec<String>> {
        for language in languages {
            if let Some(texts) = self
                .0
                .get(language)
                .and_then(|items| items.get(&item_uuid))
                .and_then(|props| props.get(property))
            {
                if !texts.is_empty() {
                    return Some(texts.clone());
                }
            }
        }
        None
    }

    pub fn get_text(
        &self,
        languages: &[String],
        item_uuid: Uuid,
        property: &str,
    ) -> Option<String> {
        self.get_texts(languages, item_uuid, property)
            .and_then(|texts| texts.into_iter().next())
    }
}

/// An immutable flow definition. The first node is the entry.
#[derive(Debug)]
pub struct Flow {
    pub uuid: Uuid,
    pub name: String,
    pub spec_version: String,
    /// ISO 639-3 base language of the definition.
    pub language: String,
    pub flow_type: FlowType,
    pub expire_after_minutes: Option<u32>,
    pub localization: Localization,
    pub nodes: Vec<Node>,
    node_index: HashMap<Uuid, usize>,
}

impl Flow {
    /// A flow with no nodes; starting it completes immediately.
    pub fn empty(uuid: Uuid, name: impl Into<String>, language: impl Into<String>) -> Self {
        Flow {
            uuid,
            name: name.into(),
            spec_version: "13.0.0".to_string(),
            language: language.into(),
            flow_type: FlowType::Messaging,
            expire_after_minutes: None,
            localization: Localization::default(),
            nodes: Vec::new(),
            node_index: HashMap::new(),
        }
    }

    pub fn node(&self, uuid: Uuid) -> Option<&Node> {
        self.node_index.get(&uuid).map(|i| &self.nodes[*i])
    }

    pub fn entry_node(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Walks every action and reports its asset dependencies, invoking
    /// `missing` for each reference the registry cannot resolve.
    pub fn check_dependencies(
        &self,
        assets: &SessionAssets,
        missing: &mut MissingCallback<'_>,
    ) -> Vec<Dependency> {
        let mut all = Vec::new();
        for node in &self.nodes {
            for action in &node.actions {
                for dep in action.dependencies() {
                    if !dependency_resolves(&dep, assets) {
                        missing(dep.clone());
                    }
                    all.push(dep);
                }
            }
        }
        all
    }
}

fn dependency_resolves(dep: &Dependency, assets: &SessionAssets) -> bool {
    use crate::assets::AssetKind;
    match (dep.kind, &dep.reference.uuid, &dep.reference.key) {
        (AssetKind::Flow, Some(uuid), _) => assets.flow(*uuid).is_some(),
        (AssetKind::Channel, Some(uuid), _) => assets.channel(*uuid).is_some(),
        (AssetKind::Group, Some(uuid), _) => assets.group(*uuid).is_some(),
        (AssetKind::Label, Some(uuid), _) => assets.label(*uuid).is_some(),
        (AssetKind::Template, Some(uuid), _) => assets.template(*uuid).is_some(),
        (AssetKind::Classifier, Some(uuid), _) => assets.classifier(*uuid).is_some(),
        (AssetKind::Field, _, Some(key)) => assets.field(key).is_some(),
        (AssetKind::Global, _, Some(key)) => assets.global(key).is_some(),
        // contacts and users are not session assets
        (AssetKind::Contact | AssetKind::User, _, _) => true,
        _ => false,
    }
}

// wire envelopes

#[derive(Deserialize)]
struct FlowEnvelope {
    uuid: Uuid,
    name: String,
    #[serde(default = "default_spec_version")]
    spec_version: String,
    language: String,
    #[serde(rename = "type", default = "default_flow_type")]
    flow_type: FlowType,
    #[serde(default)]
    expire_after_minutes: Option<u32>,
    #[serde(default)]
    localization: Localization,
    #[serde(default)]
    nodes: Vec<Json>,
}

fn default_spec_version() -> String {
    "13.0.0".to_string()
}

fn default_flow_type() -> FlowType {
    FlowType::Messaging
}

#[derive(Deserialize)]
struct NodeEnvelope {
    uuid: Uuid,
    #[serde(default)]
    actions: Vec<Json>,
    #[serde(default)]
    router: Option<Json>,
    #[serde(default)]
    exits: Vec<Exit>,
}

/// Reads a flow from its wire form, enforcing the structural invariants:
/// unique node and action UUIDs, exit destinations that exist, and router
/// exits that are a subset of the node's exits.
pub fn read_flow(data: &Json, registry: &ActionRegistry) -> Result<Flow, ReadError> {
    let envelope: FlowEnvelope = serde_json::from_value(data.clone())?;

    let mut nodes = Vec::with_capacity(envelope.nodes.len());
    let mut node_index = HashMap::new();
    let mut action_uuids: HashSet<Uuid> = HashSet::new();

    for node_data in &envelope.nodes {
        let node_env: NodeEnvelope = serde_json::from_value(node_data.clone())?;

        if node_index.contains_key(&node_env.uuid) {
            return Err(ReadError::invalid(
                "flow",
                format!("node UUID {} is duplicated", node_env.uuid),
            ));
        }

        let mut actions = Vec::with_capacity(node_env.actions.len());
        for action_data in &node_env.actions {
            let action = registry.read(action_data)?;
            if !action_uuids.insert(action.uuid()) {
                return Err(ReadError::invalid(
                    "flow",
                    format!("action UUID {} is duplicated", action.uuid()),
                ));
            }
            actions.push(action);
        }

        let router = node_env.router.as_ref().map(read_router).transpose()?;
        if let Some(router) = &router {
            let exit_uuids: Vec<Uuid> = node_env.exits.iter().map(|e| e.uuid).collect();
            router
                .validate(&exit_uuids)
                .map_err(|e| ReadError::invalid("flow", e))?;
        }

        node_index.insert(node_env.uuid, nodes.len());
        nodes.push(Node {
            uuid: node_env.uuid,
            actions,
            router,
            exits: node_env.exits,
        });
    }

    // every exit destination must be a node of this flow
    for node in &nodes {
        for exit in &node.exits {
            if let Some(destination) = exit.destination_uuid {
                if !node_index.contains_key(&destination) {
                    return Err(ReadError::invalid(
                        "flow",
                        format!(
                            "exit {} has destination {} which is not a node in the flow",
                            exit.uuid, destination
                        ),
                    ));
                }
            }
        }
    }

    Ok(Flow {
        uuid: envelope.uuid,
        name: envelope.name,
        spec_version: envelope.spec_version,
        language: envelope.language,
        flow_type: envelope.flow_type,
        expire_after_minutes: envelope.expire_after_minutes,
        localization: envelope.localization,
        nodes,
        node_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ActionRegistry {
        ActionRegistry::with_builtins()
    }

    #[test]
    fn test_read_minimal_flow() {
        let node_uuid = Uuid::new_v4();
        let flow = read_flow(
            &serde_json::json!({
                "uuid": "50c3706e-fedb-42c0-8eab-dda3335714b7",
                "name": "Registration",
                "spec_version": "13.0.0",
                "language": "eng",
                "type": "messaging",
                "expire_after_minutes": 30,
                "nodes": [
                    {
                        "uuid": node_uuid,
                        "actions": [],
                        "exits": [{"uuid": Uuid::new_v4()}]
                    }
                ]
            }),
            &registry(),
        )
        .unwrap();

        assert_eq!(flow.name, "Registration");
        assert_eq!(flow.language, "eng");
        assert_eq!(flow.flow_type, FlowType::Messaging);
        assert_eq!(flow.expire_after_minutes, Some(30));
        assert_eq!(flow.entry_node().unwrap().uuid, node_uuid);
        assert!(flow.node(node_uuid).is_some());
        assert!(flow.node(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_duplicate_node_uuid_rejected() {
        let node_uuid = Uuid::new_v4();
        let err = read_flow(
            &serde_json::json!({
                "uuid": Uuid::new_v4(),
                "name": "Bad",
                "language": "eng",
                "nodes": [
                    {"uuid": node_uuid, "exits": []},
                    {"uuid": node_uuid, "exits": []}
                ]
            }),
            &registry(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicated"));
    }

    #[test]
    fn test_dangling_exit_destination_rejected() {
        let err = read_flow(
            &serde_json::json!({
                "uuid": Uuid::new_v4(),
                "name": "Bad",
                "language": "eng",
                "nodes": [
                    {
                        "uuid": Uuid::new_v4(),
                        "exits": [{"uuid": Uuid::new_v4(), "destination_uuid": Uuid::new_v4()}]
                    }
                ]
            }),
            &registry(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a node in the flow"));
    }

    #[test]
    fn test_router_exit_subset_enforced() {
        let cat_uuid = Uuid::new_v4();
        let err = read_flow(
            &serde_json::json!({
                "uuid": Uuid::new_v4(),
                "name": "Bad",
                "language": "eng",
                "nodes": [
                    {
                        "uuid": Uuid::new_v4(),
                        "router": {
                            "type": "switch",
                            "operand": "@input.text",
                            "categories": [
                                {"uuid": cat_uuid, "name": "All", "exit_uuid": Uuid::new_v4()}
                            ],
                            "default_category_uuid": cat_uuid
                        },
                        "exits": [{"uuid": Uuid::new_v4()}]
                    }
                ]
            }),
            &registry(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not an exit of the node"));
    }

    #[test]
    fn test_localization_lookup() {
        let item = Uuid::new_v4();
        let mut data = serde_json::json!({"fra": {}});
        data["fra"][item.to_string()] = serde_json::json!({"name": ["Rouge"]});
        let localization: Localization = serde_json::from_value(data).unwrap();

        let langs = vec!["fra".to_string()];
        assert_eq!(
            localization.get_text(&langs, item, "name"),
            Some("Rouge".to_string())
        );
        assert_eq!(localization.get_text(&langs, item, "arguments"), None);
        assert_eq!(
            localization.get_text(&["spa".to_string()], item, "name"),
            None
        );
    }
}
