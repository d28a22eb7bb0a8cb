//! The closed set of domain events the client understands.

use serde_json::Value;

use super::fields::Fields;

const ASSIGNMENT_ID: &[&str] = &["id_tarea", "tarea_id"];
const ASSIGNMENT_TITLE: &[&str] = &["tarea_titulo", "titulo_tarea", "titulo", "tarea"];
const COURSE_ID: &[&str] = &["id_curso", "curso_id"];
const COURSE_NAME: &[&str] = &["curso_nombre", "nombre_curso", "curso"];
const STUDENT_NAME: &[&str] = &["estudiante_nombre", "nombre_estudiante", "estudiante"];

/// Raw event names as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    NuevaTarea,
    TareaCalificada,
    EntregaRecibida,
    NuevoModulo,
    CalificacionPublicada,
    PagoAprobado,
    PagoRechazado,
    NuevoPago,
    NuevaMatricula,
    MatriculaAprobada,
    Anuncio,
}

impl EventName {
    pub const ALL: [EventName; 11] = [
        EventName::NuevaTarea,
        EventName::TareaCalificada,
        EventName::EntregaRecibida,
        EventName::NuevoModulo,
        EventName::CalificacionPublicada,
        EventName::PagoAprobado,
        EventName::PagoRechazado,
        EventName::NuevoPago,
        EventName::NuevaMatricula,
        EventName::MatriculaAprobada,
        EventName::Anuncio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::NuevaTarea => "nueva_tarea",
            EventName::TareaCalificada => "tarea_calificada",
            EventName::EntregaRecibida => "entrega_recibida",
            EventName::NuevoModulo => "nuevo_modulo",
            EventName::CalificacionPublicada => "calificacion_publicada",
            EventName::PagoAprobado => "pago_aprobado",
            EventName::PagoRechazado => "pago_rechazado",
            EventName::NuevoPago => "nuevo_pago",
            EventName::NuevaMatricula => "nueva_matricula",
            EventName::MatriculaAprobada => "matricula_aprobada",
            EventName::Anuncio => "anuncio",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentPayload {
    pub assignment_id: Option<u64>,
    pub title: Option<String>,
    pub course_id: Option<u64>,
    pub course_name: Option<String>,
    pub due_date: Option<String>,
}

impl AssignmentPayload {
    pub fn from_value(value: &Value) -> Self {
        let f = Fields(value);
        Self {
            assignment_id: f.id(&["id_tarea", "tarea_id", "id"]),
            title: f.text(&["titulo", "tarea_titulo", "nombre"]),
            course_id: f.id(COURSE_ID),
            course_name: f.text(COURSE_NAME),
            due_date: f.text(&["fecha_limite", "fecha_entrega"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradePayload {
    pub assignment_id: Option<u64>,
    pub assignment_title: Option<String>,
    pub course_id: Option<u64>,
    pub course_name: Option<String>,
    pub grade: Option<f64>,
    pub max_grade: Option<f64>,
}

impl GradePayload {
    pub fn from_value(value: &Value) -> Self {
        let f = Fields(value);
        Self {
            assignment_id: f.id(ASSIGNMENT_ID),
            assignment_title: f.text(ASSIGNMENT_TITLE),
            course_id: f.id(COURSE_ID),
            course_name: f.text(COURSE_NAME),
            grade: f.number(&["nota", "calificacion", "puntaje"]),
            max_grade: f.number(&["nota_maxima", "puntaje_maximo"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionPayload {
    pub assignment_id: Option<u64>,
    pub assignment_title: Option<String>,
    pub course_id: Option<u64>,
    pub course_name: Option<String>,
    pub student_name: Option<String>,
}

impl SubmissionPayload {
    pub fn from_value(value: &Value) -> Self {
        let f = Fields(value);
        Self {
            assignment_id: f.id(ASSIGNMENT_ID),
            assignment_title: f.text(ASSIGNMENT_TITLE),
            course_id: f.id(COURSE_ID),
            course_name: f.text(COURSE_NAME),
            student_name: f.text(STUDENT_NAME),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModulePayload {
    pub module_id: Option<u64>,
    pub module_name: Option<String>,
    pub course_id: Option<u64>,
    pub course_name: Option<String>,
}

impl ModulePayload {
    pub fn from_value(value: &Value) -> Self {
        let f = Fields(value);
        Self {
            module_id: f.id(&["id_modulo", "modulo_id"]),
            module_name: f.text(&["modulo_nombre", "nombre_modulo", "nombre", "titulo"]),
            course_id: f.id(COURSE_ID),
            course_name: f.text(COURSE_NAME),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentPayload {
    pub payment_id: Option<u64>,
    pub amount: Option<f64>,
    pub concept: Option<String>,
    pub reason: Option<String>,
    pub student_name: Option<String>,
}

impl PaymentPayload {
    pub fn from_value(value: &Value) -> Self {
        let f = Fields(value);
        Self {
            payment_id: f.id(&["id_pago", "pago_id"]),
            amount: f.number(&["monto", "importe"]),
            concept: f.text(&["concepto", "descripcion"]),
            reason: f.text(&["motivo", "observacion", "observaciones"]),
            student_name: f.text(STUDENT_NAME),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrollmentPayload {
    pub enrollment_id: Option<u64>,
    pub course_id: Option<u64>,
    pub course_name: Option<String>,
    pub student_name: Option<String>,
}

impl EnrollmentPayload {
    pub fn from_value(value: &Value) -> Self {
        let f = Fields(value);
        Self {
            enrollment_id: f.id(&["id_matricula", "matricula_id", "id_solicitud"]),
            course_id: f.id(COURSE_ID),
            course_name: f.text(COURSE_NAME),
            student_name: f.text(STUDENT_NAME),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnouncementPayload {
    pub title: Option<String>,
    pub message: Option<String>,
    pub course_id: Option<u64>,
    pub course_name: Option<String>,
}

impl AnnouncementPayload {
    pub fn from_value(value: &Value) -> Self {
        let f = Fields(value);
        Self {
            title: f.text(&["titulo", "asunto"]),
            message: f.text(&["mensaje", "contenido", "descripcion"]),
            course_id: f.id(COURSE_ID),
            course_name: f.text(COURSE_NAME),
        }
    }
}

/// A domain event with its typed payload. Every payload field is optional.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    NewAssignment(AssignmentPayload),
    AssignmentGraded(GradePayload),
    SubmissionReceived(SubmissionPayload),
    ModulePublished(ModulePayload),
    GradePublished(GradePayload),
    PaymentApproved(PaymentPayload),
    PaymentRejected(PaymentPayload),
    PaymentSubmitted(PaymentPayload),
    EnrollmentRequested(EnrollmentPayload),
    EnrollmentApproved(EnrollmentPayload),
    Announcement(AnnouncementPayload),
}

impl DomainEvent {
    /// Parse a wire event. Only unknown names yield `None`; a malformed
    /// payload produces an event with empty fields.
    pub fn parse(name: &str, payload: &Value) -> Option<Self> {
        EventName::parse(name).map(|name| Self::from_parts(name, payload))
    }

    pub fn from_parts(name: EventName, payload: &Value) -> Self {
        match name {
            EventName::NuevaTarea => Self::NewAssignment(AssignmentPayload::from_value(payload)),
            EventName::TareaCalificada => Self::AssignmentGraded(GradePayload::from_value(payload)),
            EventName::EntregaRecibida => {
                Self::SubmissionReceived(SubmissionPayload::from_value(payload))
            }
            EventName::NuevoModulo => Self::ModulePublished(ModulePayload::from_value(payload)),
            EventName::CalificacionPublicada => {
                Self::GradePublished(GradePayload::from_value(payload))
            }
            EventName::PagoAprobado => Self::PaymentApproved(PaymentPayload::from_value(payload)),
            EventName::PagoRechazado => Self::PaymentRejected(PaymentPayload::from_value(payload)),
            EventName::NuevoPago => Self::PaymentSubmitted(PaymentPayload::from_value(payload)),
            EventName::NuevaMatricula => {
                Self::EnrollmentRequested(EnrollmentPayload::from_value(payload))
            }
            EventName::MatriculaAprobada => {
                Self::EnrollmentApproved(EnrollmentPayload::from_value(payload))
            }
            EventName::Anuncio => Self::Announcement(AnnouncementPayload::from_value(payload)),
        }
    }

    pub fn name(&self) -> EventName {
        match self {
            Self::NewAssignment(_) => EventName::NuevaTarea,
            Self::AssignmentGraded(_) => EventName::TareaCalificada,
            Self::SubmissionReceived(_) => EventName::EntregaRecibida,
            Self::ModulePublished(_) => EventName::NuevoModulo,
            Self::GradePublished(_) => EventName::CalificacionPublicada,
            Self::PaymentApproved(_) => EventName::PagoAprobado,
            Self::PaymentRejected(_) => EventName::PagoRechazado,
            Self::PaymentSubmitted(_) => EventName::NuevoPago,
            Self::EnrollmentRequested(_) => EventName::NuevaMatricula,
            Self::EnrollmentApproved(_) => EventName::MatriculaAprobada,
            Self::Announcement(_) => EventName::Anuncio,
        }
    }
}
