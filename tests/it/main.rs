use anyhow::Result;
use assert_cmd::prelude::*;
use serde_json::{json, Value};
use std::process::{Command, Stdio};

const BIN: &str = "talos-image-provider";

fn props(url: &str, bucket: &str) -> Value {
    json!({
        "download_url": url,
        "namespace": "axaxnpcrorw5",
        "bucket": bucket,
        "object_name": "talos-image.oci",
        "user_ocid": "ocid1.user.oc1..user",
        "fingerprint": "aa:bb",
        "tenancy_ocid": "ocid1.tenancy.oc1..tenancy",
        "region": "us-sanjose-1",
        "private_key": "unused",
    })
}

fn diff(olds: &Value, news: &Value) -> Result<Value> {
    let td = tempfile::tempdir()?;
    let olds_path = td.path().join("olds.json");
    let news_path = td.path().join("news.json");
    std::fs::write(&olds_path, serde_json::to_vec(olds)?)?;
    std::fs::write(&news_path, serde_json::to_vec(news)?)?;
    let out = Command::cargo_bin(BIN)?
        .args(&["diff", "--id", "talos-image.oci", "--olds"])
        .arg(&olds_path)
        .arg("--news")
        .arg(&news_path)
        .output()?;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    Ok(serde_json::from_slice(&out.stdout)?)
}

#[test]
fn test_run_help() -> Result<()> {
    let mut cmd = Command::cargo_bin(BIN)?;
    cmd.arg("--help")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let s = cmd.status()?;
    assert!(s.success());
    Ok(())
}

#[test]
fn test_version_token() -> Result<()> {
    let out = Command::cargo_bin(BIN)?.arg("version-token").output()?;
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout)?, "1.11.5\n");

    let out = Command::cargo_bin(BIN)?
        .args(&["version-token", "https://example.com/latest/oracle-arm64.raw.xz"])
        .output()?;
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8(out.stderr)?.contains("no version token"));
    Ok(())
}

#[test]
fn test_diff() -> Result<()> {
    let url = "https://factory.talos.dev/image/abcd/v1.11.5/oracle-arm64.raw.xz";
    let a = props(url, "os_images");
    let b = props(url, "elsewhere");
    assert_eq!(diff(&a, &b)?, json!({"changes": false, "replaces": []}));

    let c = props(&url.replace("1.11.5", "1.12.0"), "os_images");
    assert_eq!(
        diff(&a, &c)?,
        json!({"changes": true, "replaces": ["download_url"]})
    );
    Ok(())
}

#[test]
fn test_diff_sparse_properties() -> Result<()> {
    let url = "https://factory.talos.dev/image/abcd/v1.11.5/oracle-arm64.raw.xz";
    let old = json!({ "download_url": url });
    assert_eq!(
        diff(&old, &props(url, "os_images"))?,
        json!({"changes": false, "replaces": []})
    );
    Ok(())
}

#[test]
fn test_invalid_properties() -> Result<()> {
    let mut cmd = Command::cargo_bin(BIN)?;
    cmd.args(&["delete", "--properties", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    {
        use std::io::Write;
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(br#"{"download_url": "x"}"#)?;
    }
    let out = child.wait_with_output()?;
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8(out.stderr)?.contains("Reading properties from -"));
    Ok(())
}

#[test]
fn test_plan() -> Result<()> {
    let out = Command::cargo_bin(BIN)?.arg("plan").output()?;
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout)?;
    let first = stdout.lines().next().unwrap();
    assert_eq!(first, "cowgill (compartment)");
    assert!(stdout.contains("  display_name: talos_v1.11.5"));
    let image = stdout.find("talos-image (image)").unwrap();
    let upload = stdout.find("talos-oci (image-upload)").unwrap();
    assert!(upload < image);
    Ok(())
}

fn bot_event(doc: &Value) -> Result<Value> {
    let mut cmd = Command::cargo_bin(BIN)?;
    cmd.args(&["bot", "event", "--seed", "3"])
        .env_remove("OPEN_ROUTER_KEY")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    {
        use std::io::Write;
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(&serde_json::to_vec(doc)?)?;
    }
    let out = child.wait_with_output()?;
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    Ok(serde_json::from_slice(&out.stdout)?)
}

#[test]
fn test_bot_website() -> Result<()> {
    let out = Command::cargo_bin(BIN)?.args(&["bot", "website"]).output()?;
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8(out.stdout)?,
        "https://cowgilltrailcollective.com/\n"
    );
    Ok(())
}

#[test]
fn test_bot_selection() -> Result<()> {
    let event = |user: &str| {
        json!({
            "type": "app_mention",
            "channel": "C0A2GBX3SKW",
            "user": user,
            "text": "<@UBOT> pick",
            "thread_ts": "1700000000.000100",
            "parent_user_id": "UPOSTER",
        })
    };
    let replies = json!([
        {"user": "UPOSTER"},
        {"user": "UA"},
        {"user": "UBOT", "bot_id": "B01"},
    ]);

    let posts = bot_event(&json!({"event": event("UPOSTER"), "replies": replies.clone()}))?;
    assert_eq!(
        posts,
        json!([{
            "action": "message",
            "channel": "C0A2GBX3SKW",
            "thread_ts": "1700000000.000100",
            "text": "<@UA> you have been selected!",
        }])
    );

    let posts = bot_event(&json!({"event": event("UA"), "replies": replies.clone()}))?;
    assert_eq!(posts[0]["action"], "ephemeral");
    assert_eq!(posts[0]["user"], "UA");

    // Other channels are ignored without consulting the model
    let mut elsewhere = event("UPOSTER");
    elsewhere["channel"] = json!("C000");
    assert_eq!(bot_event(&json!({"event": elsewhere}))?, json!([]));
    Ok(())
}
