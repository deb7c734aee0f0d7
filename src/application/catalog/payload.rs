//! Wire payloads decoded into canonical request structs.
//!
//! Product writes arrive either as JSON or as multipart forms. Both are
//! normalized into [`ProductPayload`] before validation, so the services never
//! look at the transport.

use serde_json::Value;
use uuid::Uuid;

use crate::application::catalog::media::Upload;
use crate::application::validation::{FieldErrors, JsonFields, expect_object, parse_uuid};
use crate::domain::fields::FieldProblem;

const NOT_A_FILE: &str =
    "The submitted data was not a file. Check the encoding type on the form.";

/// Text parts and file parts of a multipart form, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<(String, Upload)>,
}

impl MultipartForm {
    fn last_text(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn texts<'a>(&'a self, names: &'a [&'a str]) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| names.contains(&key.as_str()))
            .map(|(_, value)| value.as_str())
    }

    fn has_text(&self, names: &[&str]) -> bool {
        self.fields
            .iter()
            .any(|(key, _)| names.contains(&key.as_str()))
    }
}

/// A product write body as received.
#[derive(Debug, Clone)]
pub enum ProductBody {
    Json(Value),
    Multipart(MultipartForm),
}

/// Canonical product write request.
///
/// `None` means "not supplied". Decoding problems are kept in `problems` and
/// reported together with validation failures.
#[derive(Debug, Clone, Default)]
pub struct ProductPayload {
    pub style_number: Option<String>,
    pub gauge: Option<String>,
    pub end: Option<String>,
    pub weight: Option<String>,
    pub description: Option<String>,
    pub category: Option<Uuid>,
    /// `Some(None)` clears the sub-category.
    pub sub_category: Option<Option<Uuid>>,
    pub composition: Option<Vec<Uuid>>,
    pub image: Option<Upload>,
    pub images: Option<Vec<Upload>>,
    pub problems: FieldErrors,
}

const COMPOSITION_KEYS: &[&str] = &["composition", "composition[]"];
const IMAGES_KEYS: &[&str] = &["images", "images[]"];

impl ProductPayload {
    pub fn decode(body: ProductBody) -> Self {
        match body {
            ProductBody::Json(value) => Self::from_json(&value),
            ProductBody::Multipart(form) => Self::from_multipart(form),
        }
    }

    fn from_json(value: &Value) -> Self {
        let object = match expect_object(value) {
            Ok(object) => object,
            Err(problems) => {
                return Self {
                    problems,
                    ..Self::default()
                };
            }
        };

        let fields = JsonFields::new(object);
        let mut problems = FieldErrors::new();
        let mut payload = Self {
            style_number: fields.text(&mut problems, "style_number"),
            gauge: fields.text(&mut problems, "gauge"),
            end: fields.text(&mut problems, "end"),
            weight: fields.text(&mut problems, "weight"),
            description: fields.text(&mut problems, "description"),
            category: fields.uuid(&mut problems, "category"),
            sub_category: fields.nullable_uuid(&mut problems, "sub_category"),
            composition: fields.uuid_list(&mut problems, "composition"),
            ..Self::default()
        };

        for key in ["image", "images"] {
            if object.get(key).is_some_and(|value| !value.is_null()) {
                problems.push_message(key, NOT_A_FILE);
            }
        }

        payload.problems = problems;
        payload
    }

    fn from_multipart(form: MultipartForm) -> Self {
        let mut problems = FieldErrors::new();
        let text = |name: &str| form.last_text(name).map(str::to_string);

        let category = form
            .last_text("category")
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| problems.capture("category", parse_uuid(raw)));

        let sub_category = form.last_text("sub_category").map(|raw| {
            if raw.trim().is_empty() {
                None
            } else {
                problems.capture("sub_category", parse_uuid(raw))
            }
        });
        // A malformed id must not be read as "clear".
        let sub_category = if problems.contains("sub_category") {
            None
        } else {
            sub_category
        };

        let composition = if form.has_text(COMPOSITION_KEYS) {
            let mut ids = Vec::new();
            let mut failed = false;
            for raw in form.texts(COMPOSITION_KEYS) {
                for part in raw.split(',').filter(|part| !part.trim().is_empty()) {
                    match parse_uuid(part) {
                        Ok(id) => ids.push(id),
                        Err(problem) => {
                            problems.push("composition", problem);
                            failed = true;
                        }
                    }
                }
            }
            (!failed).then_some(ids)
        } else {
            None
        };

        let mut image = None;
        let mut images: Option<Vec<Upload>> = None;
        for (name, upload) in &form.files {
            if upload.file_name.is_empty() && upload.bytes.is_empty() {
                continue;
            }
            if name == "image" {
                image = Some(upload.clone());
            } else if IMAGES_KEYS.contains(&name.as_str()) {
                images.get_or_insert_with(Vec::new).push(upload.clone());
            }
        }

        for key in ["image", "images"] {
            if form.last_text(key).is_some_and(|value| !value.trim().is_empty()) {
                problems.push_message(key, NOT_A_FILE);
            }
        }

        Self {
            style_number: text("style_number"),
            gauge: text("gauge"),
            end: text("end"),
            weight: text("weight"),
            description: text("description"),
            category,
            sub_category,
            composition,
            image,
            images,
            problems,
        }
    }
}

/// One entry of a category's `subcategories` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCategoryInput {
    pub id: Option<Uuid>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryPayload {
    pub name: Option<String>,
    pub subcategories: Option<Vec<SubCategoryInput>>,
    pub problems: FieldErrors,
}

impl CategoryPayload {
    pub fn decode(value: &Value) -> Self {
        let object = match expect_object(value) {
            Ok(object) => object,
            Err(problems) => {
                return Self {
                    problems,
                    ..Self::default()
                };
            }
        };

        let fields = JsonFields::new(object);
        let mut problems = FieldErrors::new();
        let name = fields.text(&mut problems, "name");
        let subcategories = fields
            .array(&mut problems, "subcategories")
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(index, item)| decode_subcategory(index, item, &mut problems))
                    .collect()
            });

        Self {
            name,
            subcategories,
            problems,
        }
    }
}

/// Objects carry `id` and/or `name`; a bare string is an id when it parses as
/// one and a name otherwise.
fn decode_subcategory(
    index: usize,
    item: &Value,
    problems: &mut FieldErrors,
) -> Option<SubCategoryInput> {
    match item {
        Value::String(raw) => Some(match parse_uuid(raw) {
            Ok(id) => SubCategoryInput {
                id: Some(id),
                name: None,
            },
            Err(_) => SubCategoryInput {
                id: None,
                name: Some(raw.clone()),
            },
        }),
        Value::Object(object) => {
            let fields = JsonFields::new(object);
            let mut nested = FieldErrors::new();
            let id = fields.uuid(&mut nested, "id");
            let name = fields.text(&mut nested, "name");
            if id.is_none() && name.is_none() && nested.is_empty() {
                nested.push("name", FieldProblem::Missing);
            }
            if nested.is_empty() {
                Some(SubCategoryInput { id, name })
            } else {
                for field in nested.fields() {
                    for message in nested.get(field).unwrap_or_default() {
                        problems.push_message(format!("subcategories.{index}.{field}"), message);
                    }
                }
                None
            }
        }
        _ => {
            problems.push(
                format!("subcategories.{index}"),
                FieldProblem::WrongType {
                    expected: "an object",
                },
            );
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompositionPayload {
    pub material: Option<String>,
    pub problems: FieldErrors,
}

impl CompositionPayload {
    pub fn decode(value: &Value) -> Self {
        match expect_object(value) {
            Ok(object) => {
                let mut problems = FieldErrors::new();
                let material = JsonFields::new(object).text(&mut problems, "material");
                Self { material, problems }
            }
            Err(problems) => Self {
                material: None,
                problems,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    fn upload(name: &str) -> Upload {
        Upload {
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(b"png"),
        }
    }

    #[test]
    fn json_and_multipart_decode_to_the_same_payload() {
        let category = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let from_json = ProductPayload::decode(ProductBody::Json(json!({
            "style_number": "KN-1",
            "gauge": "7GG",
            "category": category.to_string(),
            "composition": [first.to_string(), second.to_string()],
        })));

        let form = MultipartForm {
            fields: vec![
                ("style_number".into(), "KN-1".into()),
                ("gauge".into(), "7GG".into()),
                ("category".into(), category.to_string()),
                ("composition".into(), first.to_string()),
                ("composition".into(), second.to_string()),
            ],
            files: Vec::new(),
        };
        let from_form = ProductPayload::decode(ProductBody::Multipart(form));

        for payload in [&from_json, &from_form] {
            assert!(payload.problems.is_empty(), "{:?}", payload.problems);
            assert_eq!(payload.style_number.as_deref(), Some("KN-1"));
            assert_eq!(payload.category, Some(category));
            assert_eq!(payload.composition, Some(vec![first, second]));
            assert_eq!(payload.sub_category, None);
        }
    }

    #[test]
    fn multipart_accepts_comma_separated_composition() {
        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        let form = MultipartForm {
            fields: vec![("composition".into(), format!("{}, {}", ids[0], ids[1]))],
            files: Vec::new(),
        };
        let payload = ProductPayload::decode(ProductBody::Multipart(form));
        assert_eq!(payload.composition, Some(ids.to_vec()));
    }

    #[test]
    fn multipart_empty_composition_clears() {
        let form = MultipartForm {
            fields: vec![("composition".into(), String::new())],
            files: Vec::new(),
        };
        let payload = ProductPayload::decode(ProductBody::Multipart(form));
        assert_eq!(payload.composition, Some(Vec::new()));
    }

    #[test]
    fn multipart_collects_files() {
        let form = MultipartForm {
            fields: Vec::new(),
            files: vec![
                ("image".into(), upload("main.png")),
                ("images".into(), upload("a.png")),
                ("images[]".into(), upload("b.png")),
                (
                    "images".into(),
                    Upload {
                        file_name: String::new(),
                        content_type: None,
                        bytes: Bytes::new(),
                    },
                ),
            ],
        };
        let payload = ProductPayload::decode(ProductBody::Multipart(form));
        assert_eq!(payload.image.map(|u| u.file_name), Some("main.png".into()));
        assert_eq!(payload.images.map(|list| list.len()), Some(2));
    }

    #[test]
    fn invalid_ids_are_reported_per_field() {
        let payload = ProductPayload::decode(ProductBody::Json(json!({
            "category": "x",
            "sub_category": "y",
            "composition": ["z"],
            "image": "not-a-file",
        })));
        for field in ["category", "sub_category", "composition", "image"] {
            assert!(payload.problems.contains(field), "missing {field}");
        }
        assert_eq!(payload.composition, None);
    }

    #[test]
    fn multipart_malformed_sub_category_is_not_a_clear() {
        let form = MultipartForm {
            fields: vec![("sub_category".into(), "bogus".into())],
            files: Vec::new(),
        };
        let payload = ProductPayload::decode(ProductBody::Multipart(form));
        assert_eq!(payload.sub_category, None);
        assert!(payload.problems.contains("sub_category"));
    }

    #[test]
    fn multipart_blank_sub_category_clears() {
        let form = MultipartForm {
            fields: vec![("sub_category".into(), " ".into())],
            files: Vec::new(),
        };
        let payload = ProductPayload::decode(ProductBody::Multipart(form));
        assert_eq!(payload.sub_category, Some(None));
    }

    #[test]
    fn category_payload_accepts_objects_and_strings() {
        let existing = Uuid::new_v4();
        let payload = CategoryPayload::decode(&json!({
            "name": "Knitwear",
            "subcategories": [
                { "name": "Wool" },
                { "id": existing.to_string() },
                "Cotton",
                existing.to_string(),
            ]
        }));
        assert!(payload.problems.is_empty());
        let subs = payload.subcategories.expect("subcategories");
        assert_eq!(subs.len(), 4);
        assert_eq!(subs[0].name.as_deref(), Some("Wool"));
        assert_eq!(subs[1].id, Some(existing));
        assert_eq!(subs[2].name.as_deref(), Some("Cotton"));
        assert_eq!(subs[3].id, Some(existing));
    }

    #[test]
    fn category_payload_reports_nested_errors_with_index() {
        let payload = CategoryPayload::decode(&json!({
            "subcategories": [{ "name": "ok" }, {}, 5]
        }));
        assert!(payload.problems.contains("subcategories.1.name"));
        assert!(payload.problems.contains("subcategories.2"));
        assert_eq!(payload.subcategories.map(|s| s.len()), Some(1));
    }
}
