use anyhow::Result;
use serde_json::json;
use teamcity_api_models::{ModelError, ResourceKind, ResultSet, lookup};

#[test]
fn build_envelope_decodes_in_server_order() -> Result<()> {
    let payload = json!({
        "count": 2,
        "href": "/app/rest/builds?locator=buildType:Ansvc_Branches_Py34",
        "build": [
            {"id": 11, "number": "164", "status": "SUCCESS", "branchName": "master"},
            {"id": 10, "number": "163", "status": "FAILURE", "branchName": "feature"}
        ]
    });

    let set = ResultSet::from_envelope(payload, ResourceKind::Build.item_key())?;

    assert_eq!(set.count(), 2);
    assert_eq!(set.reported_count(), Some(2));
    let numbers: Vec<_> = set
        .records()
        .iter()
        .filter_map(|record| lookup(record, "number"))
        .collect();
    assert_eq!(numbers, vec![&json!("164"), &json!("163")]);
    Ok(())
}

#[test]
fn empty_collection_omits_item_array() -> Result<()> {
    let set = ResultSet::from_envelope(json!({"count": 0}), "build")?;
    assert_eq!(set.count(), 0);
    assert!(set.records().is_empty());
    Ok(())
}

#[test]
fn malformed_envelopes_are_rejected() {
    assert_eq!(
        ResultSet::from_envelope(json!([1, 2]), "project"),
        Err(ModelError::NotAnObject {
            context: "'project' collection".to_string()
        })
    );
    assert_eq!(
        ResultSet::from_envelope(json!({"project": "nope"}), "project"),
        Err(ModelError::NotAnArray {
            key: "project".to_string()
        })
    );
    assert_eq!(
        ResultSet::from_envelope(json!({"project": [{"id": "a"}, 3]}), "project"),
        Err(ModelError::ItemNotAnObject {
            key: "project".to_string(),
            index: 1
        })
    );
}

#[test]
fn retain_keeps_matching_records() -> Result<()> {
    let mut set = ResultSet::from_envelope(
        json!({"build": [
            {"id": 1, "branchName": "main"},
            {"id": 2, "branchName": "release"}
        ]}),
        "build",
    )?;
    set.retain(|record| lookup(record, "branchName") == Some(&json!("main")));
    assert_eq!(set.count(), 1);
    assert_eq!(set.into_records()[0].get("id"), Some(&json!(1)));
    Ok(())
}
