//! `respond`: answer a request from outside a listener (scripts, editors).

use clap::Args;
use loop_core::{save_data_url_image, FeedbackMetadata, ResponseWriter, StorageConfig};

#[derive(Args, Debug)]
pub struct RespondArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    /// Answer text; "[end]" and "[cancelled]" close the request
    #[arg(value_name = "CONTENT")]
    pub content: String,

    /// Attach an image given as a `data:image/<ext>;base64,...` URL
    #[arg(long = "image", value_name = "DATA_URL")]
    pub images: Vec<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub session_id: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub agent_id: Option<String>,
}

impl RespondArgs {
    fn metadata(&self) -> Option<FeedbackMetadata> {
        let metadata = FeedbackMetadata {
            model: self.model.clone(),
            session_id: self.session_id.clone(),
            title: self.title.clone(),
            agent_id: self.agent_id.clone(),
        };
        (metadata != FeedbackMetadata::default()).then_some(metadata)
    }
}

pub fn run(storage: &StorageConfig, args: RespondArgs) -> Result<(), String> {
    let images = args
        .images
        .iter()
        .map(|data_url| {
            save_data_url_image(storage, &args.id, data_url)
                .map(|path| path.to_string_lossy().into_owned())
        })
        .collect::<Result<Vec<_>, _>>()?;

    let metadata = args.metadata();
    let written = ResponseWriter::new(storage.clone()).submit(
        &args.id,
        &args.content,
        Some(images.as_slice()),
        metadata.as_ref(),
    )?;

    println!("{} {}", written.id, written.status);
    Ok(())
}
