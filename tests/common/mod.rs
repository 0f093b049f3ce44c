//! Shared fixtures for scenario tests: a deterministic engine, a contact,
//! and flow definition builders.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value as Json};
use uuid::Uuid;

use flowline::engine::Session;
use flowline::events::{Event, EventPayload, MsgIn};
use flowline::services::mocks::{CannedResponse, MockWebhookService};
use flowline::{
    ActionRegistry, Contact, Engine, Environment, FakeTimeProvider, FakeUuidGenerator, Flow,
    Reference, Trigger, Urn,
};

pub const CONTACT_UUID: &str = "ba96bf7f-bc2a-4873-a7c7-254d1927c4e3";

pub fn fixed_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 4, 11, 18, 24, 30).unwrap()
}

/// An engine with a fixed clock, sequential UUIDs and a seeded RNG.
pub fn deterministic_engine() -> Engine {
    Engine::builder()
        .with_time_provider(Arc::new(FakeTimeProvider::default()))
        .with_uuid_generator(Arc::new(FakeUuidGenerator::new()))
        .with_rng_seed(42)
        .build()
}

/// Same, but with a mock webhook service capped at `max_body_bytes`.
pub fn engine_with_webhook(service: Arc<MockWebhookService>) -> Engine {
    Engine::builder()
        .with_time_provider(Arc::new(FakeTimeProvider::default()))
        .with_uuid_generator(Arc::new(FakeUuidGenerator::new()))
        .with_rng_seed(42)
        .with_webhook_service(service)
        .build()
}

pub fn test_contact() -> Contact {
    let mut contact = Contact::new(CONTACT_UUID.parse().unwrap(), fixed_time());
    contact.name = Some("Ryan Lewis".into());
    contact.urns = vec![Urn::parse("tel:+12345678900").unwrap()];
    contact
}

pub fn manual_trigger(flow_uuid: Uuid, flow_name: &str) -> Trigger {
    Trigger::manual(Reference::by_uuid(flow_uuid, flow_name), fixed_time())
}

pub fn read(data: &Json) -> Flow {
    flowline::read_flow(data, &ActionRegistry::with_builtins()).expect("valid flow")
}

pub fn environment() -> Environment {
    Environment::default().with_default_language("eng")
}

/// A `msg_received` resume event.
pub fn msg_event(text: &str) -> Event {
    Event::new(
        fixed_time(),
        None,
        EventPayload::MsgReceived {
            msg: MsgIn {
                uuid: "2d611e17-fb22-457f-b802-b8f7ec5cda5b".parse().unwrap(),
                urn: Some("tel:+12345678900".into()),
                channel: None,
                text: text.into(),
                attachments: Vec::new(),
            },
        },
    )
}

pub fn event_types(session: &Session) -> Vec<&'static str> {
    session.events().iter().map(|e| e.type_name()).collect()
}

pub fn events_of_type<'a>(session: &'a Session, type_name: &str) -> Vec<&'a Event> {
    session
        .events()
        .iter()
        .filter(|e| e.type_name() == type_name)
        .collect()
}

// ---- flow definition builders ----

/// One node, one `send_msg`, one terminal exit.
pub fn send_msg_flow(flow_uuid: Uuid, text: &str) -> Json {
    json!({
        "uuid": flow_uuid,
        "name": "Greeting",
        "spec_version": "13.0.0",
        "language": "eng",
        "type": "messaging",
        "nodes": [
            {
                "uuid": "72a1f5df-49f9-45df-94c9-d86f7ea064e5",
                "actions": [
                    {
                        "type": "send_msg",
                        "uuid": "ad154980-7bf7-4ab8-8728-545fd6378912",
                        "text": text
                    }
                ],
                "exits": [{"uuid": "37d8813f-1402-4ad2-9cc2-e9054a96525b"}]
            }
        ]
    })
}

pub const COLOUR_NODE: &str = "46d51f50-58de-49da-8d13-dadbf322685d";
pub const COLOUR_EXIT_RED: &str = "37d8813f-1402-4ad2-9cc2-e9054a96525b";
pub const COLOUR_EXIT_OTHER: &str = "0680b01f-ba0b-48f4-a688-d2f963130126";

/// A wait node whose switch router captures a `Colour` result:
/// `has_any_word("red blue")` routes Red, everything else routes Other.
pub fn colour_flow(flow_uuid: Uuid) -> Json {
    json!({
        "uuid": flow_uuid,
        "name": "Favorites",
        "spec_version": "13.0.0",
        "language": "eng",
        "type": "messaging",
        "nodes": [
            {
                "uuid": COLOUR_NODE,
                "actions": [],
                "router": {
                    "type": "switch",
                    "operand": "@input.text",
                    "categories": [
                        {
                            "uuid": "af0b848b-615c-4712-8391-aa62eb1b0b0a",
                            "name": "Red",
                            "exit_uuid": COLOUR_EXIT_RED
                        },
                        {
                            "uuid": "9b65b9d5-ab61-4b5a-bbf9-5a4c2ba5d9bc",
                            "name": "Other",
                            "exit_uuid": COLOUR_EXIT_OTHER
                        }
                    ],
                    "cases": [
                        {
                            "uuid": "5d45e35e-8b8e-4b2f-9320-bbf7f54fb1ba",
                            "type": "has_any_word",
                            "arguments": ["red blue"],
                            "category_uuid": "af0b848b-615c-4712-8391-aa62eb1b0b0a"
                        }
                    ],
                    "default_category_uuid": "9b65b9d5-ab61-4b5a-bbf9-5a4c2ba5d9bc",
                    "result_name": "Colour",
                    "wait": {"type": "msg"}
                },
                "exits": [
                    {"uuid": COLOUR_EXIT_RED},
                    {"uuid": COLOUR_EXIT_OTHER}
                ]
            }
        ]
    })
}

/// A parent flow whose single node enters `child_uuid`.
pub fn parent_flow(flow_uuid: Uuid, child_uuid: Uuid) -> Json {
    json!({
        "uuid": flow_uuid,
        "name": "Parent",
        "spec_version": "13.0.0",
        "language": "eng",
        "type": "messaging",
        "nodes": [
            {
                "uuid": "e97cd6d5-3354-4dbd-85bc-6c1f79e308a3",
                "actions": [
                    {
                        "type": "enter_flow",
                        "uuid": "2d3ecc25-0e45-4719-b9aa-54302b589f1f",
                        "flow": {"uuid": child_uuid, "name": "Child"}
                    }
                ],
                "exits": [{"uuid": "d2f852ec-7b4e-457f-ae7f-f8b243c49ff5"}]
            }
        ]
    })
}

/// Two nodes that route to each other with no wait between them.
pub fn loop_flow(flow_uuid: Uuid) -> Json {
    let n1 = "1ec9dae5-2f06-4c7d-b55e-2ec7c9d6c64d";
    let n2 = "9c9f4f6d-99b6-4cf1-a6a8-ed0b70b6c5c4";
    json!({
        "uuid": flow_uuid,
        "name": "Infinite",
        "spec_version": "13.0.0",
        "language": "eng",
        "type": "messaging",
        "nodes": [
            {
                "uuid": n1,
                "actions": [],
                "exits": [{"uuid": "a63852cb-f8f6-43cc-9b0a-e8c0ee7b9df7", "destination_uuid": n2}]
            },
            {
                "uuid": n2,
                "actions": [],
                "exits": [{"uuid": "f987109e-dab9-4e34-9e8a-5a0f6e66a1c8", "destination_uuid": n1}]
            }
        ]
    })
}

/// One node calling a webhook, then a terminal exit.
pub fn webhook_flow(flow_uuid: Uuid, url: &str) -> Json {
    json!({
        "uuid": flow_uuid,
        "name": "Lookup",
        "spec_version": "13.0.0",
        "language": "eng",
        "type": "messaging",
        "nodes": [
            {
                "uuid": "72a1f5df-49f9-45df-94c9-d86f7ea064e5",
                "actions": [
                    {
                        "type": "call_webhook",
                        "uuid": "06153fbd-3e2c-413a-b0df-ed15d631835a",
                        "method": "GET",
                        "url": url,
                        "result_name": "Lookup"
                    }
                ],
                "exits": [{"uuid": "37d8813f-1402-4ad2-9cc2-e9054a96525b"}]
            }
        ]
    })
}

/// One node adding the contact to the given groups.
pub fn add_groups_flow(flow_uuid: Uuid, groups: &[(Uuid, &str)]) -> Json {
    let refs: Vec<Json> = groups
        .iter()
        .map(|(uuid, name)| json!({"uuid": uuid, "name": name}))
        .collect();
    json!({
        "uuid": flow_uuid,
        "name": "Grouper",
        "spec_version": "13.0.0",
        "language": "eng",
        "type": "messaging",
        "nodes": [
            {
                "uuid": "72a1f5df-49f9-45df-94c9-d86f7ea064e5",
                "actions": [
                    {
                        "type": "add_contact_groups",
                        "uuid": "ad154980-7bf7-4ab8-8728-545fd6378912",
                        "groups": refs
                    }
                ],
                "exits": [{"uuid": "37d8813f-1402-4ad2-9cc2-e9054a96525b"}]
            }
        ]
    })
}

/// A canned 2000-byte response for webhook cap tests.
pub fn big_body_response() -> CannedResponse {
    CannedResponse {
        status_code: 200,
        content_type: Some("text/plain".into()),
        body: vec![b'Y'; 2000],
    }
}
