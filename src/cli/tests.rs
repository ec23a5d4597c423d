use super::chat::{
    format_message, is_approval, parse_input, ChatInput, CliPermissionHandler, TimelinePrinter,
};
use super::*;
use crate::core::message::Message;
use crate::mcp::local::device::NOTIFICATION_LISTENER_SETTINGS;
use crate::mcp::permissions::{PermissionAction, CALL_PHONE, NOTIFICATION_ACCESS};
use tempfile::TempDir;
use tokio::sync::mpsc;

mod test_helpers {
    use super::*;

    pub(super) fn parse_args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv)
            .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
    }

    pub(super) fn temp_store() -> (TempDir, ConfigStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("config.toml"));
        (dir, store)
    }

    pub(super) fn words(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    pub(super) fn test_services(store: ConfigStore) -> Services {
        Services::new(
            Arc::new(store),
            Arc::new(CredentialStore::new_with_keyring(false)),
        )
    }
}

use test_helpers::{parse_args, temp_store, test_services, words};

#[test]
fn no_subcommand_defaults_to_chat() {
    let args = parse_args(&["mcp-assistant"]);
    assert!(args.command.is_none());
    assert!(args.log.is_none());
}

#[test]
fn log_flag_is_global() {
    let args = parse_args(&["mcp-assistant", "chat", "--log", "/tmp/assistant.log"]);
    assert!(matches!(args.command, Some(Commands::Chat)));
    assert_eq!(
        args.log.as_deref(),
        Some(std::path::Path::new("/tmp/assistant.log"))
    );
}

#[test]
fn servers_add_collects_repeated_headers() {
    let argv = [
        "mcp-assistant",
        "servers",
        "add",
        "work",
        "https://mcp.example.com",
        "--header",
        "Authorization: Bearer abc",
        "--header",
        "X-Team: core",
    ];
    match parse_args(&argv).command {
        Some(Commands::Servers {
            command: ServerCommand::Add { name, url, headers },
        }) => {
            assert_eq!(name, "work");
            assert_eq!(url, "https://mcp.example.com");
            assert_eq!(headers, words(&["Authorization: Bearer abc", "X-Team: core"]));
        }
        _ => panic!("expected servers add for argv={argv:?}"),
    }
}

#[test]
fn set_accepts_multi_word_values() {
    let argv = ["mcp-assistant", "set", "system-prompt", "Be", "brief"];
    match parse_args(&argv).command {
        Some(Commands::Set { key, value }) => {
            assert_eq!(key.as_deref(), Some("system-prompt"));
            assert_eq!(value, Some(words(&["Be", "brief"])));
        }
        _ => panic!("expected set for argv={argv:?}"),
    }
}

#[test]
fn parse_header_trims_name_and_value() {
    assert_eq!(
        parse_header("Authorization:  Bearer a:b ").unwrap(),
        ("Authorization".to_string(), "Bearer a:b".to_string())
    );
    assert!(parse_header("no separator").is_err());
    assert!(parse_header(" : value").is_err());
}

#[test]
fn set_boolean_persists_and_reports() {
    let (_dir, store) = temp_store();

    let message = handle_set(&store, Some("memory"), &words(&["on"])).unwrap();
    assert_eq!(message, "✅ Set memory to: on");
    assert!(store.load().unwrap().memory.enabled);

    handle_unset(&store, "memory").unwrap();
    assert!(!store.load().unwrap().memory.enabled);
}

#[test]
fn set_rejects_invalid_boolean() {
    let (_dir, store) = temp_store();
    let err = handle_set(&store, Some("auto-reconnect"), &words(&["maybe"])).unwrap_err();
    assert!(matches!(err, SettingError::InvalidBoolean(ref value) if value == "maybe"));
    assert!(!store.load().unwrap().auto_reconnect);
}

#[test]
fn set_model_accepts_display_name_and_stores_id() {
    let (_dir, store) = temp_store();

    let message = handle_set(&store, Some("model"), &words(&["GPT-4o", "mini"])).unwrap();
    assert_eq!(message, "✅ Set model to: GPT-4o mini (gpt-4o-mini)");
    assert_eq!(
        store.load().unwrap().selected_model.as_deref(),
        Some("gpt-4o-mini")
    );

    let err = handle_set(&store, Some("model"), &words(&["gpt-9"])).unwrap_err();
    assert!(matches!(err, SettingError::UnknownModel(_)));
}

#[test]
fn set_max_tool_rounds_requires_positive_number() {
    let (_dir, store) = temp_store();

    assert!(matches!(
        handle_set(&store, Some("max-tool-rounds"), &words(&["0"])),
        Err(SettingError::InvalidNumber(_))
    ));
    assert!(matches!(
        handle_set(&store, Some("max-tool-rounds"), &[]),
        Err(SettingError::MissingArgs { .. })
    ));

    handle_set(&store, Some("max-tool-rounds"), &words(&["4"])).unwrap();
    assert_eq!(store.load().unwrap().max_tool_rounds, Some(4));
}

#[test]
fn set_text_keys_update_nested_settings() {
    let (_dir, store) = temp_store();

    handle_set(&store, Some("hot-word-text"), &words(&["hey", "there"])).unwrap();
    handle_set(&store, Some("memory-content"), &words(&["Likes", "tea."])).unwrap();

    let config = store.load().unwrap();
    assert_eq!(config.hot_word.text, "hey there");
    assert_eq!(config.memory.content, "Likes tea.");

    handle_unset(&store, "memory-content").unwrap();
    assert!(store.load().unwrap().memory.content.is_empty());
}

#[test]
fn unknown_key_is_reported() {
    let (_dir, store) = temp_store();
    assert!(matches!(
        handle_set(&store, Some("colour"), &words(&["blue"])),
        Err(SettingError::UnknownKey(ref key)) if key == "colour"
    ));
    assert!(matches!(
        handle_unset(&store, "colour"),
        Err(SettingError::UnknownKey(_))
    ));
}

#[test]
fn set_without_key_lists_every_setting() {
    let (_dir, store) = temp_store();
    handle_set(&store, Some("tts"), &words(&["yes"])).unwrap();

    let listing = handle_set(&store, None, &[]).unwrap();
    assert!(listing.starts_with("Current configuration:"));
    assert!(listing.contains("  tts: on"));
    assert!(listing.contains("  system-prompt: (unset)"));
    assert!(listing.contains("  model: (unset, default: claude-3-5-sonnet-latest)"));
    for key in SettingRegistry::new().keys() {
        assert!(listing.contains(&format!("  {key}:")), "missing {key}");
    }
}

#[test]
fn model_list_marks_the_selected_model() {
    let listing = format_model_list(Some("gemini-2.0-flash"));
    let marked: Vec<&str> = listing
        .lines()
        .filter(|line| line.trim_start().starts_with('*'))
        .collect();
    assert_eq!(marked.len(), 1);
    assert!(marked[0].contains("gemini-2.0-flash"));
    assert!(marked[0].contains("(Gemini)"));

    let fallback = format_model_list(None);
    assert!(fallback
        .lines()
        .any(|line| line.contains("* claude-3-5-sonnet-latest")));
}

#[test]
fn parse_input_recognizes_commands_and_prompts() {
    assert_eq!(parse_input("   "), ChatInput::Empty);
    assert_eq!(
        parse_input(" call mom "),
        ChatInput::Prompt("call mom".to_string())
    );
    assert_eq!(
        parse_input("/connect  Work Server "),
        ChatInput::Connect("Work Server".to_string())
    );
    assert_eq!(parse_input("/connect"), ChatInput::Usage("/connect NAME"));
    assert_eq!(
        parse_input("/disconnect LocalMcp"),
        ChatInput::Disconnect("LocalMcp".to_string())
    );
    assert_eq!(parse_input("/CHECK"), ChatInput::Check);
    assert_eq!(parse_input("/cancel"), ChatInput::Cancel);
    assert_eq!(parse_input("/status"), ChatInput::Status);
    assert_eq!(parse_input("/exit"), ChatInput::Quit);
    assert_eq!(
        parse_input("/model gpt-4o"),
        ChatInput::Unknown("model".to_string())
    );
}

#[test]
fn approval_accepts_only_yes() {
    assert!(is_approval("y"));
    assert!(is_approval(" YES "));
    assert!(!is_approval("n"));
    assert!(!is_approval(""));
    assert!(!is_approval("sure"));
}

#[test]
fn timeline_printer_emits_new_and_changed_messages_once() {
    let mut printer = TimelinePrinter::default();
    let user = Message::user("call mom");
    let mut tool = Message::tool("Tool call: phone-call-tool({})");

    let first = printer.render(&[user.clone(), tool.clone()]);
    assert_eq!(
        first,
        vec![
            "you> call mom".to_string(),
            "[tool] Tool call: phone-call-tool({})".to_string()
        ]
    );

    assert!(printer.render(&[user.clone(), tool.clone()]).is_empty());

    tool.set_text("Tool response: phone-call-tool => ok");
    let agent = Message::agent("Calling now.");
    let third = printer.render(&[user, tool, agent]);
    assert_eq!(
        third,
        vec![
            "[tool] Tool response: phone-call-tool => ok".to_string(),
            "assistant> Calling now.".to_string()
        ]
    );
}

#[test]
fn failed_tool_messages_are_flagged() {
    let mut message = Message::tool("Tool call: slow()");
    if let Message::Tool { failed, .. } = &mut message {
        *failed = true;
    }
    assert_eq!(format_message(&message), "[tool failed] Tool call: slow()");
    assert_eq!(
        format_message(&Message::thinking("hmm")),
        "[thinking] hmm"
    );
}

#[tokio::test]
async fn runtime_permission_prompt_round_trips_through_the_loop() {
    let (_dir, store) = temp_store();
    let services = test_services(store);
    let (tx, mut rx) = mpsc::unbounded_channel();
    services
        .gate
        .attach(Arc::new(CliPermissionHandler::new(tx)));

    let gate = services.gate.clone();
    let request =
        tokio::spawn(async move { gate.request(&[CALL_PHONE.to_string()]).await });

    let prompt = rx.recv().await.expect("prompt");
    assert_eq!(prompt.question, "Allow CALL_PHONE? [y/n]");
    prompt.answer(true, &services);

    assert!(request.await.unwrap());
    assert!(services.gate.is_granted(CALL_PHONE));
}

#[tokio::test]
async fn notification_settings_prompt_grants_access() {
    let (_dir, store) = temp_store();
    let services = test_services(store);
    let (tx, mut rx) = mpsc::unbounded_channel();
    services
        .gate
        .attach(Arc::new(CliPermissionHandler::new(tx)));

    services.gate.request_custom_permission(
        "Notification Read Permission is required.",
        Some(PermissionAction::new(
            "Open notification access settings",
            NOTIFICATION_LISTENER_SETTINGS,
        )),
    );

    let prompt = rx.recv().await.expect("prompt");
    assert!(prompt
        .question
        .starts_with("Notification Read Permission is required."));
    assert!(!services.gate.is_granted(NOTIFICATION_ACCESS));

    prompt.answer(true, &services);
    assert!(services.gate.is_granted(NOTIFICATION_ACCESS));
}

#[tokio::test]
async fn import_adds_new_servers_and_replaces_existing_ones() {
    let (_dir, store) = temp_store();
    let services = test_services(store);
    services
        .manager
        .add_remote(RemoteServerConfig::new("work", "https://old.example.com"))
        .await
        .unwrap();

    let raw = r#"{"list":[
        {"connectionName":"work","url":"https://new.example.com","headers":{"Authorization":"Bearer t"}},
        {"connectionName":"home","url":"https://home.example.com"}
    ]}"#;
    let list = RemoteServerList::from_json(raw).unwrap();
    let imported = import_servers(&services.manager, list).await.unwrap();
    assert_eq!(imported, 2);

    let config = services.config.load().unwrap();
    assert_eq!(config.remote_servers.len(), 2);
    let work = config.remote_server("work").unwrap();
    assert_eq!(work.url, "https://new.example.com");
    assert_eq!(
        work.headers.get("Authorization").map(String::as_str),
        Some("Bearer t")
    );
    assert!(config.remote_server("home").is_some());

    let names: Vec<String> = services
        .manager
        .connections()
        .iter()
        .map(|connection| connection.name.clone())
        .collect();
    assert_eq!(names, vec!["LocalMcp", "work", "home"]);
}
