use crate::session::{GeneratedScene, SessionState, VideoState};

/// File name used when exporting a scene image, e.g. `Scene_03.png`
pub fn scene_file_name(scene_number: u32, extension: &str) -> String {
    format!("Scene_{:02}.{}", scene_number, extension)
}

fn scene_status(scene: &GeneratedScene) -> String {
    if scene.is_loading {
        "generating…".to_string()
    } else if let Some(error) = &scene.error {
        format!("failed ({})", error)
    } else if let Some(image) = &scene.image {
        format!("ready ({}, {} bytes)", image.mime_type, image.data.len())
    } else {
        "empty".to_string()
    }
}

pub fn format_storyboard_readable(state: &SessionState) -> String {
    let mut output = String::new();
    output.push_str(&format!("# {}\n\n", state.topic));
    output.push_str(&format!(
        "**Scenes:** {} | **Model:** {} | **Aspect:** {}\n\n",
        state.scenes.len(),
        state.settings.image_model.name(),
        state.settings.aspect_ratio.as_str()
    ));

    if !state.titles.is_empty() {
        output.push_str("## Titles\n\n");
        for (i, title) in state.titles.iter().enumerate() {
            output.push_str(&format!("{}. {} / {}\n", i + 1, title.english, title.localized));
        }
        output.push('\n');
    }

    output.push_str("## Scenes\n\n");
    for generated in &state.scenes {
        let scene = &generated.scene;
        output.push_str(&format!(
            "### Scene {:02} [{}]\n\n",
            scene.scene_number,
            scene_status(generated)
        ));
        output.push_str(&format!("{}\n\n", scene.description));
        output.push_str(&format!("**Image prompt:** {}\n\n", scene.image_prompt));
        output.push_str(&format!("**Motion prompt:** {}\n\n", scene.i2v_prompt));
    }

    match &state.video {
        VideoState::Idle => {}
        VideoState::Pending => output.push_str("## Video\n\ngenerating…\n\n"),
        VideoState::Done(video) => output.push_str(&format!(
            "## Video\n\nready ({}, {} bytes)\n\n",
            video.mime_type,
            video.data.len()
        )),
        VideoState::Failed(reason) => {
            output.push_str(&format!("## Video\n\nfailed: {}\n\n", reason))
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MediaArtifact, Scene, Title};

    #[test]
    fn scene_file_names_are_zero_padded() {
        assert_eq!(scene_file_name(3, "png"), "Scene_03.png");
        assert_eq!(scene_file_name(12, "jpg"), "Scene_12.jpg");
    }

    #[test]
    fn readable_storyboard_lists_scene_status() {
        let scene = Scene {
            scene_number: 1,
            description: "등대지기가 마지막 불을 켠다".into(),
            image_prompt: "lighthouse at dusk".into(),
            i2v_prompt: "slow pan".into(),
        };
        let state = SessionState {
            topic: "A lighthouse keeper's last night".into(),
            titles: vec![Title {
                english: "The Last Light".into(),
                localized: "마지막 불빛".into(),
            }],
            scenes: vec![
                GeneratedScene {
                    image: Some(MediaArtifact::new("image/png", vec![0; 4])),
                    is_loading: false,
                    ..GeneratedScene::loading(scene.clone())
                },
                GeneratedScene {
                    error: Some("No image generated".into()),
                    is_loading: false,
                    ..GeneratedScene::loading(Scene {
                        scene_number: 2,
                        ..scene
                    })
                },
            ],
            ..SessionState::default()
        };

        let text = format_storyboard_readable(&state);
        assert!(text.starts_with("# A lighthouse keeper's last night"));
        assert!(text.contains("1. The Last Light / 마지막 불빛"));
        assert!(text.contains("### Scene 01 [ready (image/png, 4 bytes)]"));
        assert!(text.contains("### Scene 02 [failed (No image generated)]"));
        assert!(!text.contains("## Video"));
    }
}
