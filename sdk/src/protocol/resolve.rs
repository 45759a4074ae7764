//! Work-list normalization.
//!
//! Flattens both request shapes into one uniform list of
//! [`ResolvedObject`] records, the single normalization point.
//! Everything downstream (pipeline, signer, HTTP client) consumes
//! these records and never sees the original shape again.
//!
//! Order is the caller's declaration order: the `objects` list order,
//! or group order then inner-object order. `<objectId>` substitution
//! is exact textual replacement, not URL-encoded.

use {
    super::{
        validate::OBJECT_ID_PLACEHOLDER,
        wire::{
            CallbackTargets, ContentSource, DataType, GroupObjects, Headers, SignRequest,
            SignedContentType, UploadTarget, WorkList,
        },
    },
    std::collections::BTreeMap,
};

/// A fully-resolved signable item with all URLs, content and options
/// computed. Exactly one of `inline_content` / `download_url` is set.
#[derive(Clone, Debug)]
pub struct ResolvedObject {
    pub id: String,
    pub data_type: DataType,

    pub inline_content: Option<String>,
    pub download_url: Option<String>,
    pub download_method: String,
    pub download_headers: Headers,

    /// Final URL, `<objectId>` already substituted.
    pub upload_url: String,
    pub upload_method: String,
    pub upload_headers: Headers,
    pub signed_content_type: SignedContentType,

    pub on_success: String,
    pub on_error: String,
    pub progress: Option<String>,
    pub callback_headers: Headers,

    pub pdf_label: Option<String>,
    pub xml_xpath: Option<String>,
    pub xml_id_attribute: Option<String>,
}

/// Substitute the `<objectId>` placeholder in a URL template.
pub fn substitute_object_id(template: &str, object_id: &str) -> String {
    template.replace(OBJECT_ID_PLACEHOLDER, object_id)
}

/// Flatten a validated request into its work list.
pub fn resolve(request: &SignRequest) -> Vec<ResolvedObject> {
    let resolved = match &request.work {
        WorkList::Objects(objects) => objects
            .iter()
            .map(|obj| {
                let mut ro = base_record(
                    &obj.id,
                    obj.data_type,
                    &obj.upload,
                    &obj.callbacks,
                    obj.pdf_options.as_ref().map(|p| p.label.clone()),
                    obj.xml_options.as_ref().map(|x| x.xpath.clone()),
                    obj.xml_options.as_ref().and_then(|x| x.id_attribute.clone()),
                );
                match &obj.content {
                    ContentSource::Inline { content } => {
                        ro.inline_content = Some(content.clone());
                    }
                    ContentSource::Remote {
                        download_url,
                        http_method,
                        headers,
                    } => {
                        ro.download_url = Some(download_url.clone());
                        ro.download_method = http_method.clone();
                        ro.download_headers = headers.clone();
                    }
                }
                ro
            })
            .collect(),
        WorkList::Groups(groups) => {
            let mut resolved = Vec::new();
            for group in groups {
                let pdf_label = group.pdf_options.as_ref().map(|p| p.label.clone());
                let xml_xpath = group.xml_options.as_ref().map(|x| x.xpath.clone());
                let xml_id = group.xml_options.as_ref().and_then(|x| x.id_attribute.clone());

                match &group.objects {
                    GroupObjects::Inline(members) => {
                        for member in members {
                            let mut ro = base_record(
                                &member.id,
                                group.data_type,
                                &group.upload,
                                &group.callbacks,
                                pdf_label.clone(),
                                xml_xpath.clone(),
                                xml_id.clone(),
                            );
                            ro.inline_content = Some(member.value.clone());
                            resolved.push(ro);
                        }
                    }
                    GroupObjects::Remote {
                        download_url,
                        download_headers,
                        objects,
                    } => {
                        for member in objects {
                            let mut ro = base_record(
                                &member.id,
                                group.data_type,
                                &group.upload,
                                &group.callbacks,
                                pdf_label.clone(),
                                xml_xpath.clone(),
                                xml_id.clone(),
                            );
                            ro.download_url =
                                Some(substitute_object_id(download_url, &member.id));
                            ro.download_headers = download_headers.clone();
                            resolved.push(ro);
                        }
                    }
                }
            }
            resolved
        }
    };

    log::info!(
        "resolved {} object(s) for request {}",
        resolved.len(),
        request.request_id
    );
    resolved
}

fn base_record(
    id: &str,
    data_type: DataType,
    upload: &UploadTarget,
    callbacks: &CallbackTargets,
    pdf_label: Option<String>,
    xml_xpath: Option<String>,
    xml_id_attribute: Option<String>,
) -> ResolvedObject {
    ResolvedObject {
        id: id.to_string(),
        data_type,
        inline_content: None,
        download_url: None,
        download_method: "GET".to_string(),
        download_headers: BTreeMap::new(),
        upload_url: substitute_object_id(&upload.upload_url, id),
        upload_method: upload.http_method.clone(),
        upload_headers: upload.headers.clone(),
        signed_content_type: upload.signed_content_type,
        on_success: callbacks.on_success.clone(),
        on_error: callbacks.on_error.clone(),
        progress: callbacks.progress.clone(),
        callback_headers: callbacks.headers.clone(),
        pdf_label,
        xml_xpath,
        xml_id_attribute,
    }
}
