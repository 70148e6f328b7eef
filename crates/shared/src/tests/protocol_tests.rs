use super::*;

fn sample_message() -> ChatMessage {
    ChatMessage {
        id: "42".to_string(),
        sender_id: UserId::from("alice"),
        receiver_id: UserId::from("bob"),
        message_type: MessageType::Text,
        content: "hello".to_string(),
        timestamp: "2024-01-01T10:00:00Z".to_string(),
        image_url: None,
        form_data: None,
        item: None,
    }
}

#[test]
fn message_serializes_with_camel_case_keys() {
    let json = serde_json::to_value(sample_message()).expect("serialize");
    assert_eq!(json["senderId"], "alice");
    assert_eq!(json["receiverId"], "bob");
    assert_eq!(json["messageType"], "TEXT");
    // absent optionals are omitted from the envelope entirely
    assert!(json.get("imageUrl").is_none());
    assert!(json.get("formData").is_none());
}

#[test]
fn unknown_message_type_deserializes_without_error() {
    let raw = r#"{
        "id": "7",
        "senderId": "alice",
        "receiverId": "bob",
        "messageType": "STICKER",
        "content": "??",
        "timestamp": "2024-01-01T10:00:00Z"
    }"#;
    let message: ChatMessage = serde_json::from_str(raw).expect("deserialize");
    assert_eq!(message.message_type, MessageType::Unknown);
    assert_eq!(message.message_type.weight(), 0);
}

#[test]
fn temp_ids_carry_the_reserved_prefix() {
    let id = temp_message_id();
    assert!(id.starts_with(TEMP_ID_PREFIX));

    let mut message = sample_message();
    assert!(!message.has_temp_id());
    message.id = id;
    assert!(message.has_temp_id());
}

#[test]
fn inbox_destination_is_per_user() {
    assert_eq!(
        inbox_destination(&UserId::from("alice")),
        "/user/alice/queue/messages"
    );
}

#[test]
fn agreement_round_trips_through_form_data_json() {
    let agreement = Agreement {
        id: AgreementId(7),
        lender_id: UserId::from("lena"),
        borrower_id: UserId::from("bob"),
        item_name: "cordless drill".to_string(),
        borrowing_start: "2024-02-01".to_string(),
        borrowing_end: "2024-02-08".to_string(),
        terms: "return with a charged battery".to_string(),
        status: AgreementStatus::Pending,
    };
    let raw = serde_json::to_string(&agreement).expect("serialize");
    assert!(raw.contains("\"status\":\"PENDING\""));
    assert!(raw.contains("\"lenderId\":\"lena\""));
    let decoded: Agreement = serde_json::from_str(&raw).expect("deserialize");
    assert_eq!(decoded, agreement);
}
