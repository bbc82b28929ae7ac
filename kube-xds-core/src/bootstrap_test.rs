use anyhow::{Context, Result};
use serde_json::json;

use crate::bootstrap::{Bootstrap, Node};
use crate::error::XdsError;

#[test]
fn decode_proto_json_field_names() -> Result<()> {
    let doc = Bootstrap::decode(r#"{"node":{"id":"n1","cluster":"c1"},"staticResources":{"clusters":[{"name":"c1"}],"listeners":[{"name":"l1"}]}}"#)?;

    let node = doc.identity();
    assert!(node.id == "n1", "expected node.id to be n1 got {}", node.id);
    assert!(node.cluster == "c1", "expected node.cluster to be c1 got {}", node.cluster);
    let res = doc.static_resources.as_ref().context("expected static resources")?;
    assert!(res.clusters.len() == 1, "expected 1 cluster got {}", res.clusters.len());
    assert!(res.listeners.len() == 1, "expected 1 listener got {}", res.listeners.len());
    assert!(res.secrets.is_empty(), "expected no secrets got {}", res.secrets.len());

    Ok(())
}

#[test]
fn decode_original_field_names() -> Result<()> {
    let doc = Bootstrap::decode(r#"{"node":{"id":"n1","cluster":"c1"},"static_resources":{"secrets":[{"name":"s1"}]}}"#)?;

    let res = doc.static_resources.as_ref().context("expected static resources")?;
    assert!(res.secrets.len() == 1, "expected 1 secret got {}", res.secrets.len());
    assert!(res.secrets[0].name == "s1", "expected secret s1 got {}", res.secrets[0].name);

    Ok(())
}

#[test]
fn decode_err_includes_content() -> Result<()> {
    let content = r#"{"node": "#;

    let res = Bootstrap::decode(content);

    assert!(
        matches!(&res, Err(XdsError::Decode { content: val, .. }) if val == content),
        "expected decode error carrying the raw content, got {:?}",
        res
    );
    let msg = res.unwrap_err().to_string();
    assert!(msg.contains(content), "expected error message to contain the raw content, got {}", msg);

    Ok(())
}

#[test]
fn encode_preserves_unknown_fields() -> Result<()> {
    let doc = Bootstrap::decode(
        &json!({
            "node": {"id": "n1", "cluster": "c1", "locality": {"zone": "a"}},
            "admin": {"address": {"socketAddress": {"address": "127.0.0.1", "portValue": 9901}}},
            "staticResources": {"clusters": [{"name": "c1", "connectTimeout": "1s"}]},
        })
        .to_string(),
    )?;

    let encoded = Bootstrap::decode(&doc.encode()?)?;

    assert!(encoded == doc, "expected encode/decode to be lossless, got {:?}", encoded);
    assert!(encoded.extra.contains_key("admin"), "expected admin to be preserved");
    let node = encoded.identity();
    assert!(node.extra.contains_key("locality"), "expected node.locality to be preserved");
    let clusters = &encoded.static_resources.as_ref().context("expected static resources")?.clusters;
    assert!(
        clusters[0].config.get("connectTimeout") == Some(&json!("1s")),
        "expected cluster body to be preserved, got {:?}",
        clusters[0].config
    );

    Ok(())
}

#[test]
fn validate_identity_requires_id_and_cluster() -> Result<()> {
    let cases = vec![
        (None, "node.id is required"),
        (Some(Node::new("", "c1")), "node.id is required"),
        (Some(Node::new("n1", "")), "node.cluster is required"),
    ];
    for (node, expected) in cases {
        let doc = Bootstrap { node, ..Default::default() };
        let res = doc.validate_identity();
        assert!(
            matches!(&res, Err(XdsError::Validation(msg)) if msg == expected),
            "expected validation error {:?} got {:?}",
            expected,
            res
        );
    }

    let doc = Bootstrap {
        node: Some(Node::new("n1", "c1")),
        ..Default::default()
    };
    doc.validate_identity()?;

    Ok(())
}

#[test]
fn is_empty_only_without_identity_and_resources() -> Result<()> {
    assert!(Bootstrap::default().is_empty(), "expected default document to be empty");
    assert!(Bootstrap::decode("{}")?.is_empty(), "expected {{}} document to be empty");
    assert!(
        Bootstrap::decode(r#"{"staticResources":{}}"#)?.is_empty(),
        "expected document with empty resources to be empty"
    );
    assert!(
        !Bootstrap::decode(r#"{"node":{"id":"n1"}}"#)?.is_empty(),
        "expected document with an identity to not be empty"
    );
    assert!(
        !Bootstrap::decode(r#"{"staticResources":{"listeners":[{"name":"l1"}]}}"#)?.is_empty(),
        "expected document with resources to not be empty"
    );

    Ok(())
}
