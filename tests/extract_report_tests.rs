use serde_json::{json, Value};
use sire_report::{extract_report, CommentRecord, ExtractError};

fn fixture() -> Value {
    serde_json::from_str(include_str!("fixtures/inspection.json")).unwrap()
}

fn record(label: &str, inspector: &str, operator: &str, date: &str) -> CommentRecord {
    CommentRecord {
        question_label: label.to_string(),
        inspector_comment: inspector.to_string(),
        operator_comment: operator.to_string(),
        date: date.to_string(),
    }
}

#[test]
fn metadata_keeps_first_seen_order_and_formats_dates() {
    let report = extract_report(&fixture()).unwrap().expect("report");
    let rows: Vec<(&str, &str)> = report.metadata.rows().iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    assert_eq!(
        rows,
        vec![
            ("VESSELNAME", "MT Renamed"),
            ("INSPECTIONDATE", "2024-03-05 14:30"),
            ("REPORTDATETIME", "2024-03-06"),
            ("PORT", "Rotterdam"),
        ]
    );
    assert_eq!(report.metadata.get("VESSELNAME"), Some("MT Renamed"));
}

#[test]
fn comments_follow_traversal_order_with_memoized_labels() {
    let report = extract_report(&fixture()).unwrap().expect("report");
    assert_eq!(
        report.comments,
        vec![
            record("1.1", "Hose worn", "Replaced", "2024-03-07 09:15"),
            record("1.1", "Hose worn", "Verified", "2024-03-08 10:00"),
            record("2.1", "Log incomplete", "Training given", ""),
            record("1.1", "Second look", "Noted", "bad"),
        ]
    );
}

#[test]
fn empty_documents_yield_no_tables() {
    for doc in [json!(null), json!({}), json!([]), json!(""), json!(false), json!(0)] {
        assert_eq!(extract_report(&doc).unwrap(), None, "doc: {}", doc);
    }
}

#[test]
fn missing_arrays_yield_empty_tables() {
    let report = extract_report(&json!({"metaData": [], "questions": []})).unwrap().expect("report");
    assert!(report.metadata.is_empty());
    assert!(report.comments.is_empty());

    let report = extract_report(&json!({"somethingElse": 1})).unwrap().expect("report");
    assert!(report.metadata.is_empty());
    assert!(report.comments.is_empty());
}

#[test]
fn partial_question_nodes_are_tolerated() {
    let doc = json!({
        "questions": [
            {"complexResponses": [{"observations": [{"comments": "Anonymous", "initialOperatorComments": [{}]}]}]},
            {"templateQuestionId": "q-1"},
            {"templateQuestionId": "q-2", "complexResponses": [{}]},
        ]
    });
    let report = extract_report(&doc).unwrap().expect("report");
    assert_eq!(report.comments, vec![record("1.1", "Anonymous", "", "")]);
}

#[test]
fn metadata_without_value_is_blank() {
    let doc = json!({"metaData": [{"key": "FLAG"}, {"key": "SURVEYDATE", "value": null}]});
    let report = extract_report(&doc).unwrap().expect("report");
    assert_eq!(report.metadata.get("FLAG"), Some(""));
    assert_eq!(report.metadata.get("SURVEYDATE"), Some(""));
}

#[test]
fn wrong_shapes_are_traversal_failures() {
    let cases = [
        json!([1, 2]),
        json!("text"),
        json!({"metaData": "oops"}),
        json!({"metaData": [{"value": "no key"}]}),
        json!({"questions": [{"complexResponses": 5}]}),
        json!({"metaData": null}),
    ];
    for doc in cases {
        match extract_report(&doc) {
            Err(ExtractError::Traversal(msg)) => assert!(!msg.is_empty()),
            other => panic!("expected traversal failure for {}, got {:?}", doc, other),
        }
    }
}

fn commented(id: Value) -> Value {
    json!({
        "templateQuestionId": id,
        "complexResponses": [{"observations": [{"comments": "c", "initialOperatorComments": [{"comments": "o"}]}]}]
    })
}

fn labels(report: &sire_report::ExtractedReport) -> Vec<&str> {
    report.comments.iter().map(|c| c.question_label.as_str()).collect()
}

#[test]
fn non_string_metadata_values_are_kept_as_text() {
    let doc = json!({
        "metaData": [
            {"key": "IMO", "value": 9123456},
            {"key": "GASFREE", "value": true},
            {"key": "DRAFT", "value": 11.5},
            {"key": "INSPECTIONDATE", "value": 20240305},
        ],
        "questions": [commented(json!("q-a"))]
    });
    let report = extract_report(&doc).unwrap().expect("report");
    assert_eq!(report.metadata.get("IMO"), Some("9123456"));
    assert_eq!(report.metadata.get("GASFREE"), Some("true"));
    assert_eq!(report.metadata.get("DRAFT"), Some("11.5"));
    assert_eq!(report.metadata.get("INSPECTIONDATE"), Some("20240305"));
    assert_eq!(report.comments.len(), 1);
}

#[test]
fn numeric_question_ids_are_labelled() {
    let doc = json!({"questions": [commented(json!(42)), commented(json!("42")), commented(json!(42))]});
    let report = extract_report(&doc).unwrap().expect("report");
    // 42 and "42" are different identifiers
    assert_eq!(labels(&report), vec!["1.1", "2.1", "1.1"]);
}

#[test]
fn null_and_missing_question_ids_stay_apart() {
    let missing = json!({
        "complexResponses": [{"observations": [{"comments": "c", "initialOperatorComments": [{"comments": "o"}]}]}]
    });
    let doc = json!({"questions": [missing.clone(), commented(Value::Null), missing, commented(json!(""))]});
    let report = extract_report(&doc).unwrap().expect("report");
    assert_eq!(labels(&report), vec!["1.1", "2.1", "1.1", "1.1"]);
}

#[test]
fn non_string_comment_fields_are_kept_as_text() {
    let doc = json!({
        "questions": [{
            "templateQuestionId": "q-a",
            "complexResponses": [{"observations": [
                {"comments": 0, "initialOperatorComments": [{"comments": "skipped"}]},
                {"comments": false, "initialOperatorComments": [{"comments": "skipped"}]},
                {"comments": 12, "initialOperatorComments": [{"comments": 7, "commentDate": 1700000000}]},
                {"comments": "ok", "initialOperatorComments": [{"comments": null, "commentDate": null}]}
            ]}]
        }]
    });
    let report = extract_report(&doc).unwrap().expect("report");
    assert_eq!(
        report.comments,
        vec![record("1.1", "12", "7", "1700000000"), record("1.1", "ok", "", "")]
    );
}
