//! Occurrence classification of declared fields.

use std::fmt;

use crate::error::{Result, SwaError};
use crate::model::value::ValueKind;

/// How many values a field carries in its user-facing form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Occurrence {
    /// Exactly one value.
    Mandatory,
    /// Zero or one value.
    Optional,
    /// `min_occurs..=max_occurs` values.
    List,
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mandatory => "mandatory",
            Self::Optional => "optional",
            Self::List => "list",
        })
    }
}

/// The declared type of a field, as written next to its element specification.
///
/// Mirrors the type expressions a schema author can write: a bare type, an
/// optional or union wrapper, a list, or some other generic container.
/// `None` type arguments stand for a wrapper written without arguments
/// (bare `Optional`, bare `List`) or, inside a union, for the null member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// No annotation given.
    Absent,
    /// `T`
    Type(ValueKind),
    /// `Optional[T]`, or bare `Optional` with `None`.
    Optional(Option<ValueKind>),
    /// `Union[A, B, ...]`; `None` members are the null type.
    Union(Vec<Option<ValueKind>>),
    /// `List[T]`, or bare `List` with `None`.
    List(Option<ValueKind>),
    /// Any other parameterized container, e.g. `Set[T]`.
    Generic {
        container: String,
        args: Vec<ValueKind>,
    },
}

impl Annotation {
    pub fn of(kind: ValueKind) -> Self {
        Self::Type(kind)
    }

    pub fn optional(kind: ValueKind) -> Self {
        Self::Optional(Some(kind))
    }

    pub fn list(kind: ValueKind) -> Self {
        Self::List(Some(kind))
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn arg(kind: &Option<ValueKind>) -> &'static str {
            kind.map_or("None", |k| k.name())
        }
        match self {
            Self::Absent => f.write_str("<absent>"),
            Self::Type(k) => f.write_str(k.name()),
            Self::Optional(None) => f.write_str("Optional"),
            Self::Optional(Some(k)) => write!(f, "Optional[{k}]"),
            Self::Union(members) if members.is_empty() => f.write_str("Union"),
            Self::Union(members) => {
                let names: Vec<&str> = members.iter().map(arg).collect();
                write!(f, "Union[{}]", names.join(", "))
            }
            Self::List(None) => f.write_str("List"),
            Self::List(Some(k)) => write!(f, "List[{k}]"),
            Self::Generic { container, args } => {
                let names: Vec<&str> = args.iter().map(|k| k.name()).collect();
                write!(f, "{container}[{}]", names.join(", "))
            }
        }
    }
}

/// Classify `annotation` against the field's element type.
///
/// Any wrapper that does not reduce to exactly `T`, `Optional[T]` or `List[T]`
/// is a definition error for `class.field`.
pub fn classify(
    annotation: &Annotation,
    element_type: ValueKind,
    class: &str,
    field: &str,
) -> Result<Occurrence> {
    let mismatch =
        |reason: String| -> Result<Occurrence> { Err(SwaError::definition(class, field, reason)) };

    match annotation {
        Annotation::Absent => Ok(Occurrence::Mandatory),
        Annotation::Type(kind) if *kind == element_type => Ok(Occurrence::Mandatory),
        Annotation::Optional(Some(kind)) if *kind == element_type => Ok(Occurrence::Optional),
        Annotation::List(Some(kind)) if *kind == element_type => Ok(Occurrence::List),
        Annotation::Union(members) => {
            let concrete: Vec<ValueKind> = members.iter().flatten().copied().collect();
            let has_null = concrete.len() < members.len();
            match concrete.as_slice() {
                [kind] if *kind == element_type && has_null => Ok(Occurrence::Optional),
                [kind] if *kind == element_type => Ok(Occurrence::Mandatory),
                _ => mismatch(format!(
                    "annotation {annotation} must be Optional[{element_type}]"
                )),
            }
        }
        Annotation::Optional(None) | Annotation::List(None) => mismatch(format!(
            "annotation {annotation} needs a type argument ({element_type})"
        )),
        Annotation::Generic { container, .. } => mismatch(format!(
            "unsupported container {container} in annotation {annotation}"
        )),
        _ => mismatch(format!(
            "annotation {annotation} does not match element type {element_type}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: ValueKind = ValueKind::Date;

    fn run(annotation: Annotation) -> Result<Occurrence> {
        classify(&annotation, T, "Body", "when")
    }

    #[test]
    fn test_mandatory_forms() {
        assert_eq!(run(Annotation::Absent).unwrap(), Occurrence::Mandatory);
        assert_eq!(run(Annotation::of(T)).unwrap(), Occurrence::Mandatory);
        assert_eq!(run(Annotation::Union(vec![Some(T)])).unwrap(), Occurrence::Mandatory);
    }

    #[test]
    fn test_optional_forms() {
        assert_eq!(run(Annotation::optional(T)).unwrap(), Occurrence::Optional);
        assert_eq!(
            run(Annotation::Union(vec![Some(T), None])).unwrap(),
            Occurrence::Optional
        );
        assert_eq!(
            run(Annotation::Union(vec![None, Some(T)])).unwrap(),
            Occurrence::Optional
        );
    }

    #[test]
    fn test_list_form() {
        assert_eq!(run(Annotation::list(T)).unwrap(), Occurrence::List);
    }

    #[test]
    fn test_rejected_forms() {
        let rejected = [
            Annotation::Optional(None),
            Annotation::List(None),
            Annotation::Union(vec![]),
            Annotation::Union(vec![None]),
            Annotation::Union(vec![Some(T), Some(ValueKind::String), None]),
            Annotation::of(ValueKind::String),
            Annotation::optional(ValueKind::Integer),
            Annotation::list(ValueKind::Time),
            Annotation::Generic {
                container: "Set".into(),
                args: vec![T],
            },
        ];
        for annotation in rejected {
            let err = run(annotation.clone()).unwrap_err();
            assert!(err.is_definition_error(), "{annotation} should be rejected");
        }
    }

    #[test]
    fn test_annotation_display() {
        assert_eq!(
            Annotation::Union(vec![Some(T), None]).to_string(),
            "Union[date, None]"
        );
        assert_eq!(Annotation::list(T).to_string(), "List[date]");
    }
}
