//! Integration tests against a real headless Chrome

#![cfg(feature = "cdp")]

use image::{ImageFormat, Rgba, RgbaImage};
use snapscore::pipeline::{Pipeline, RenderRequest};
use snapscore::{new_renderer, RenderConfig, ServiceConfig};

fn setup() -> (tempfile::TempDir, tempfile::TempDir, ServiceConfig) {
    let challenges = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    RgbaImage::from_pixel(400, 300, Rgba([255, 0, 0, 255]))
        .save_with_format(challenges.path().join("expected_red.png"), ImageFormat::Png)
        .unwrap();

    let config = ServiceConfig {
        challenge_dir: challenges.path().to_path_buf(),
        scratch_dir: scratch.path().to_path_buf(),
        render: RenderConfig {
            sandbox: std::env::var("SNAPSCORE_NO_SANDBOX").is_err(),
            ..Default::default()
        },
        ..Default::default()
    };
    (challenges, scratch, config)
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_red_body_matches_red_reference() {
    let (_challenges, scratch, config) = setup();
    let pipeline = Pipeline::new(new_renderer(&config.render).unwrap(), config);

    let req = RenderRequest {
        markup: r#"<body style="background:red"></body>"#.to_string(),
        challenge_id: "red".to_string(),
    };
    let res = pipeline.execute(&req).await.expect("pipeline failed");

    assert!(res.score > 99.0, "score was {}", res.score);
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_blue_body_scores_near_zero() {
    let (_challenges, _scratch, config) = setup();
    let pipeline = Pipeline::new(new_renderer(&config.render).unwrap(), config);

    let req = RenderRequest {
        markup: r#"<body style="margin:0;background:blue"></body>"#.to_string(),
        challenge_id: "red".to_string(),
    };
    let res = pipeline.execute(&req).await.expect("pipeline failed");

    assert!(res.score < 1.0, "score was {}", res.score);
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_concurrent_renders_keep_their_own_output() {
    let (_challenges, _scratch, config) = setup();
    let pipeline = std::sync::Arc::new(Pipeline::new(new_renderer(&config.render).unwrap(), config));

    let jobs = ["red", "blue", "red", "blue"].into_iter().map(|colour| {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let req = RenderRequest {
                markup: format!(r#"<body style="background:{}"></body>"#, colour),
                challenge_id: "red".to_string(),
            };
            (colour, pipeline.execute(&req).await.expect("pipeline failed").score)
        })
    });

    for job in futures::future::join_all(jobs).await {
        let (colour, score) = job.unwrap();
        if colour == "red" {
            assert!(score > 99.0, "red render scored {}", score);
        } else {
            assert!(score < 1.0, "blue render scored {}", score);
        }
    }
}
