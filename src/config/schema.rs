use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "store": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                }
            },
            "queues": {
                "type": "object",
                "properties": {
                    "scan": { "$ref": "#/$defs/queue" },
                    "inspect": { "$ref": "#/$defs/queue" }
                }
            },
            "schedule": {
                "type": "object",
                "properties": {
                    "rescan_interval_secs": { "type": "integer", "minimum": 1 },
                    "reconcile_interval_secs": { "type": "integer", "minimum": 1 },
                    "rescan_after_secs": { "type": "integer", "minimum": 0 }
                }
            },
            "retention": {
                "type": "object",
                "properties": {
                    "job_ttl_secs": { "type": "integer", "minimum": 0 },
                    "image_ttl_secs": { "type": ["integer", "null"], "minimum": 0 }
                }
            },
            "scanner": {
                "type": "object",
                "properties": {
                    "binary": { "type": "string" },
                    "cache_dir": { "type": "string" },
                    "timeout_secs": { "type": "integer", "minimum": 1 },
                    "skip_db_update": { "type": "boolean" }
                }
            },
            "notifier": {
                "type": "object",
                "properties": {
                    "kind": { "type": "string", "enum": ["log", "webhook"] },
                    "webhook_url": { "type": "string" },
                    "timeout_secs": { "type": "integer", "minimum": 1 }
                }
            },
            "ingest": {
                "type": "object",
                "properties": {
                    "publish_retries": { "type": "integer", "minimum": 0 },
                    "publish_max_delay_secs": { "type": "integer", "minimum": 0 }
                }
            },
            "inspect": {
                "type": "object",
                "properties": {
                    "ignored_prefixes": { "type": "array", "items": { "type": "string" } }
                }
            },
            "api": {
                "type": "object",
                "properties": {
                    "bind": { "type": "string" },
                    "port": { "type": "integer", "minimum": 0, "maximum": 65535 }
                }
            }
        },
        "$defs": {
            "queue": {
                "type": "object",
                "properties": {
                    "visibility_timeout_secs": { "type": "integer", "minimum": 1 },
                    "max_receive_count": { "type": "integer", "minimum": 1 },
                    "redelivery_delay_secs": { "type": "integer", "minimum": 0 }
                }
            }
        }
    })
});
