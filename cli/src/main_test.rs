use clap::Parser;
use serde_json::json;

use super::*;

#[test]
fn parses_apply_with_recommendation_letter() {
    let cli = Cli::try_parse_from([
        "ias",
        "apply",
        "opp-1",
        "--kind",
        "attachment",
        "--cover-letter",
        "hello",
        "--resume",
        "cv.pdf",
        "--recommendation-letter",
        "letter.pdf",
    ])
    .unwrap();
    let Command::Apply(args) = cli.command else { panic!("expected apply") };
    assert_eq!(args.opportunity_id, "opp-1");
    assert_eq!(args.kind, Some(OpportunityKind::Attachment));
    assert_eq!(args.recommendation_letter, Some(PathBuf::from("letter.pdf")));
}

#[test]
fn cover_letter_text_and_file_conflict() {
    let result = Cli::try_parse_from([
        "ias",
        "apply",
        "opp-1",
        "--cover-letter",
        "hi",
        "--cover-letter-file",
        "letter.txt",
        "--resume",
        "cv.pdf",
    ]);
    assert!(result.is_err());
}

#[test]
fn parses_application_status_filter() {
    let cli = Cli::try_parse_from(["ias", "applications", "list", "--status", "under_review"]).unwrap();
    let Command::Applications(ApplicationsCommand { command: ApplicationsSubcommand::List { status, .. } }) =
        cli.command
    else {
        panic!("expected applications list");
    };
    assert_eq!(status, Some(ApplicationStatus::UnderReview));
}

#[test]
fn register_defaults_to_student() {
    let cli = Cli::try_parse_from([
        "ias", "register", "--name", "Amina", "--email", "a@x.io", "--password", "pw",
    ])
    .unwrap();
    let Command::Register { role, .. } = cli.command else { panic!("expected register") };
    assert_eq!(role, Role::Student);
}

#[test]
fn rejects_unknown_theme() {
    assert!(Cli::try_parse_from(["ias", "theme", "set", "sepia"]).is_err());
    assert!(Cli::try_parse_from(["ias", "theme", "set", "dark"]).is_ok());
}

#[test]
fn opportunity_kind_reads_bare_and_enveloped() {
    assert_eq!(opportunity_kind(&json!({ "type": "internship" })), Some(OpportunityKind::Internship));
    assert_eq!(
        opportunity_kind(&json!({ "opportunity": { "type": "attachment" } })),
        Some(OpportunityKind::Attachment)
    );
    assert_eq!(opportunity_kind(&json!({ "title": "x" })), None);
}

#[test]
fn explicit_storage_path_wins() {
    let path = PathBuf::from("/tmp/ias.json");
    assert_eq!(storage_path(Some(path.clone())), path);
    assert!(storage_path(None).ends_with(".ias/storage.json"));
}

#[test]
fn api_errors_show_display_message() {
    let err = CliError::from(ApiError::InvalidRequest("Please fill all required fields: cover letter, resume.".into()));
    assert_eq!(err.user_message(), "Please fill all required fields: cover letter, resume.");
    assert_eq!(CliError::NotLoggedIn.user_message(), "not logged in; run `ias login` first");
}
