use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use storyforge_core::{
    MediaArtifact, ReferenceImage, SessionState, VideoState, format_storyboard_readable,
    scene_file_name,
};
use tokio::fs;

fn guess_image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

pub async fn load_reference_image(path: &Path) -> Result<ReferenceImage> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("failed to read reference image {}", path.display()))?;
    Ok(ReferenceImage::from_bytes(guess_image_mime(path), &bytes))
}

/// Write every finished scene image, the readable storyboard and the video if
/// there is one. Returns the paths written.
pub async fn export_storyboard(state: &SessionState, out_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut written = Vec::new();
    for generated in &state.scenes {
        let Some(image) = &generated.image else {
            continue;
        };
        let path = out_dir.join(scene_file_name(
            generated.scene.scene_number,
            image.file_extension(),
        ));
        fs::write(&path, &image.data).await?;
        written.push(path);
    }

    let readable = out_dir.join("storyboard.md");
    fs::write(&readable, format_storyboard_readable(state)).await?;
    written.push(readable);

    if let VideoState::Done(video) = &state.video {
        written.push(write_video(video, &out_dir.join("video")).await?);
    }

    Ok(written)
}

/// Write a video next to `stem`, taking the extension from its MIME type
pub async fn write_video(video: &MediaArtifact, stem: &Path) -> Result<PathBuf> {
    let path = stem.with_extension(video.file_extension());
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&path, &video.data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use storyforge_core::{GeneratedScene, Scene};

    use super::*;

    fn scene(number: u32, image: Option<MediaArtifact>) -> GeneratedScene {
        GeneratedScene {
            image,
            is_loading: false,
            ..GeneratedScene::loading(Scene {
                scene_number: number,
                description: String::new(),
                image_prompt: String::new(),
                i2v_prompt: String::new(),
            })
        }
    }

    #[test]
    fn reference_mime_follows_extension() {
        assert_eq!(guess_image_mime(Path::new("a/b.PNG")), "image/png");
        assert_eq!(guess_image_mime(Path::new("face.webp")), "image/webp");
        assert_eq!(guess_image_mime(Path::new("face")), "image/jpeg");
    }

    #[tokio::test]
    async fn exports_only_finished_scenes() {
        let dir = tempfile::tempdir().unwrap();
        let state = SessionState {
            topic: "tides".into(),
            scenes: vec![
                scene(1, Some(MediaArtifact::new("image/png", vec![1]))),
                scene(2, None),
                scene(3, Some(MediaArtifact::new("image/jpeg", vec![3]))),
            ],
            video: VideoState::Done(MediaArtifact::new("video/mp4", vec![9])),
            ..SessionState::default()
        };

        let written = export_storyboard(&state, dir.path()).await.unwrap();
        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            names,
            ["Scene_01.png", "Scene_03.jpg", "storyboard.md", "video.mp4"]
        );
        assert_eq!(std::fs::read(dir.path().join("Scene_03.jpg")).unwrap(), [3]);
    }
}
