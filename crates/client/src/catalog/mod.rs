//! Role event catalog.
//!
//! Maps `(role, event)` to what the user should see: a kind, a title, a
//! message and where tapping the notification leads. This is the only place
//! that knows which roles care about which domain events.
//!
//! Rendering is total. Every field a payload may lack has a generic phrase to
//! stand in for it, so a template always comes out for a listed event.

mod events;
mod fields;

use std::collections::BTreeMap;

use pizarra_shared::{NotificationKind, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use events::{
    AnnouncementPayload, AssignmentPayload, DomainEvent, EnrollmentPayload, EventName,
    GradePayload, ModulePayload, PaymentPayload, SubmissionPayload,
};

use fields::{money, score};

const SOME_COURSE: &str = "uno de tus cursos";
const SOME_STUDENT: &str = "un estudiante";

/// Navigation target resolved when a notification is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepLink {
    pub screen: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl DeepLink {
    pub fn new(screen: impl Into<String>) -> Self {
        Self {
            screen: screen.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter if the value is known.
    pub fn param(mut self, key: &str, value: Option<u64>) -> Self {
        if let Some(value) = value {
            self.params.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// A rendered notification, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationTemplate {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub deep_link: Option<DeepLink>,
}

impl NotificationTemplate {
    fn new(kind: NotificationKind, title: impl Into<String>, body: String) -> Self {
        Self {
            kind,
            title: title.into(),
            body,
            deep_link: None,
        }
    }

    fn link(mut self, link: DeepLink) -> Self {
        self.deep_link = Some(link);
        self
    }

    fn link_opt(mut self, link: Option<DeepLink>) -> Self {
        self.deep_link = link;
        self
    }
}

/// Event names each role subscribes to.
pub fn events_for(role: Role) -> &'static [EventName] {
    use EventName::*;
    match role {
        Role::Student => &[
            NuevaTarea,
            TareaCalificada,
            NuevoModulo,
            CalificacionPublicada,
            PagoAprobado,
            PagoRechazado,
            MatriculaAprobada,
            Anuncio,
        ],
        Role::Teacher => &[EntregaRecibida, NuevaMatricula, Anuncio],
        Role::Admin => &[PagoAprobado, PagoRechazado, NuevoPago, NuevaMatricula, Anuncio],
    }
}

/// The catalog as seen by one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleCatalog {
    role: Role,
}

impl RoleCatalog {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn events(&self) -> &'static [EventName] {
        events_for(self.role)
    }

    pub fn handles(&self, name: EventName) -> bool {
        self.events().contains(&name)
    }

    /// Render a raw wire event. `None` for unknown names and for events this
    /// role does not subscribe to.
    pub fn render_raw(&self, name: &str, payload: &Value) -> Option<NotificationTemplate> {
        DomainEvent::parse(name, payload).and_then(|event| self.render(&event))
    }

    pub fn render(&self, event: &DomainEvent) -> Option<NotificationTemplate> {
        match self.role {
            Role::Student => student(event),
            Role::Teacher => teacher(event),
            Role::Admin => admin(event),
        }
    }
}

fn course_or<'a>(name: &'a Option<String>, fallback: &'a str) -> &'a str {
    name.as_deref().unwrap_or(fallback)
}

fn course_link(course_id: Option<u64>) -> Option<DeepLink> {
    course_id.map(|id| DeepLink::new("CursoDetalle").param("id_curso", Some(id)))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// " de {concept} por {amount}" with whichever parts are known.
fn payment_detail(p: &PaymentPayload) -> String {
    let mut detail = String::new();
    if let Some(concept) = &p.concept {
        detail.push_str(&format!(" de {concept}"));
    }
    if let Some(amount) = p.amount {
        detail.push_str(&format!(" por {}", money(amount)));
    }
    detail
}

fn grade_detail(p: &GradePayload) -> String {
    match (p.grade, p.max_grade) {
        (Some(grade), Some(max)) => format!(": {}/{}", score(grade), score(max)),
        (Some(grade), None) => format!(": {}", score(grade)),
        _ => String::new(),
    }
}

fn announcement(p: &AnnouncementPayload) -> NotificationTemplate {
    let title = p.title.clone().unwrap_or_else(|| "Nuevo anuncio".to_string());
    let body = match (&p.message, &p.course_name) {
        (Some(message), _) => message.clone(),
        (None, Some(course)) => format!("Hay un nuevo anuncio en {course}"),
        (None, None) => "Tienes un nuevo anuncio".to_string(),
    };
    NotificationTemplate::new(NotificationKind::General, title, body).link_opt(course_link(p.course_id))
}

fn student(event: &DomainEvent) -> Option<NotificationTemplate> {
    use NotificationKind as K;

    let template = match event {
        DomainEvent::NewAssignment(p) => {
            let course = course_or(&p.course_name, SOME_COURSE);
            let mut body = match &p.title {
                Some(title) => format!("Se publicó la tarea «{title}» en {course}"),
                None => format!("Se publicó una nueva tarea en {course}"),
            };
            if let Some(due) = &p.due_date {
                body.push_str(&format!(". Fecha límite: {due}"));
            }
            let link = match p.assignment_id {
                Some(id) => Some(
                    DeepLink::new("TareaDetalle")
                        .param("id_tarea", Some(id))
                        .param("id_curso", p.course_id),
                ),
                None => course_link(p.course_id),
            };
            NotificationTemplate::new(K::Assignment, "Nueva tarea", body).link_opt(link)
        }
        DomainEvent::AssignmentGraded(p) => {
            let body = match &p.assignment_title {
                Some(title) => format!("Tu entrega de «{title}» fue calificada{}", grade_detail(p)),
                None => format!(
                    "Una de tus entregas en {} fue calificada{}",
                    course_or(&p.course_name, SOME_COURSE),
                    grade_detail(p)
                ),
            };
            let link = p.assignment_id.map(|id| {
                DeepLink::new("TareaDetalle")
                    .param("id_tarea", Some(id))
                    .param("id_curso", p.course_id)
            });
            NotificationTemplate::new(K::Grade, "Tarea calificada", body).link_opt(link)
        }
        DomainEvent::ModulePublished(p) => {
            let course = course_or(&p.course_name, SOME_COURSE);
            let body = match &p.module_name {
                Some(module) => format!("Se publicó el módulo «{module}» en {course}"),
                None => format!("Hay un nuevo módulo disponible en {course}"),
            };
            let link = match p.module_id {
                Some(id) => Some(
                    DeepLink::new("ModuloDetalle")
                        .param("id_modulo", Some(id))
                        .param("id_curso", p.course_id),
                ),
                None => course_link(p.course_id),
            };
            NotificationTemplate::new(K::Module, "Nuevo módulo", body).link_opt(link)
        }
        DomainEvent::GradePublished(p) => {
            let body = format!(
                "Ya está disponible tu calificación en {}{}",
                course_or(&p.course_name, SOME_COURSE),
                grade_detail(p)
            );
            NotificationTemplate::new(K::Grade, "Calificación publicada", body)
                .link(DeepLink::new("Calificaciones").param("id_curso", p.course_id))
        }
        DomainEvent::PaymentApproved(p) => {
            let body = format!("Tu pago{} fue aprobado", payment_detail(p));
            NotificationTemplate::new(K::Payment, "Pago aprobado", body)
                .link(DeepLink::new("MisPagos").param("id_pago", p.payment_id))
        }
        DomainEvent::PaymentRejected(p) => {
            let next_step = match &p.reason {
                Some(reason) => format!("Motivo: {reason}"),
                None => "Revisa el comprobante y vuelve a enviarlo".to_string(),
            };
            let body = format!("Tu pago{} fue rechazado. {next_step}", payment_detail(p));
            NotificationTemplate::new(K::Payment, "Pago rechazado", body)
                .link(DeepLink::new("MisPagos").param("id_pago", p.payment_id))
        }
        DomainEvent::EnrollmentApproved(p) => {
            let body = format!(
                "Tu matrícula en {} fue aprobada",
                course_or(&p.course_name, "el curso solicitado")
            );
            let link = course_link(p.course_id).unwrap_or_else(|| DeepLink::new("MisCursos"));
            NotificationTemplate::new(K::Enrollment, "Matrícula aprobada", body).link(link)
        }
        DomainEvent::Announcement(p) => announcement(p),
        DomainEvent::SubmissionReceived(_)
        | DomainEvent::PaymentSubmitted(_)
        | DomainEvent::EnrollmentRequested(_) => return None,
    };
    Some(template)
}

fn teacher(event: &DomainEvent) -> Option<NotificationTemplate> {
    use NotificationKind as K;

    let template = match event {
        DomainEvent::SubmissionReceived(p) => {
            let who = capitalize(p.student_name.as_deref().unwrap_or(SOME_STUDENT));
            let body = match &p.assignment_title {
                Some(title) => format!("{who} entregó «{title}»"),
                None => format!(
                    "{who} entregó una tarea en {}",
                    course_or(&p.course_name, SOME_COURSE)
                ),
            };
            let link = match p.assignment_id {
                Some(id) => Some(DeepLink::new("EntregasTarea").param("id_tarea", Some(id))),
                None => course_link(p.course_id),
            };
            NotificationTemplate::new(K::Assignment, "Nueva entrega", body).link_opt(link)
        }
        DomainEvent::EnrollmentRequested(p) => {
            let who = capitalize(p.student_name.as_deref().unwrap_or("un nuevo estudiante"));
            let body = format!(
                "{who} se matriculó en {}",
                course_or(&p.course_name, SOME_COURSE)
            );
            let link = p
                .course_id
                .map(|id| DeepLink::new("EstudiantesCurso").param("id_curso", Some(id)));
            NotificationTemplate::new(K::Enrollment, "Nuevo estudiante", body).link_opt(link)
        }
        DomainEvent::Announcement(p) => announcement(p),
        DomainEvent::NewAssignment(_)
        | DomainEvent::AssignmentGraded(_)
        | DomainEvent::ModulePublished(_)
        | DomainEvent::GradePublished(_)
        | DomainEvent::PaymentApproved(_)
        | DomainEvent::PaymentRejected(_)
        | DomainEvent::PaymentSubmitted(_)
        | DomainEvent::EnrollmentApproved(_) => return None,
    };
    Some(template)
}

fn admin(event: &DomainEvent) -> Option<NotificationTemplate> {
    use NotificationKind as K;

    let template = match event {
        DomainEvent::PaymentSubmitted(p) => {
            let who = capitalize(p.student_name.as_deref().unwrap_or(SOME_STUDENT));
            let body = format!("{who} registró un pago{}", payment_detail(p));
            let link = match p.payment_id {
                Some(id) => DeepLink::new("RevisarPago").param("id_pago", Some(id)),
                None => DeepLink::new("Pagos"),
            };
            NotificationTemplate::new(K::Payment, "Nuevo pago por revisar", body).link(link)
        }
        DomainEvent::PaymentApproved(p) => {
            let whose = p
                .student_name
                .as_deref()
                .map(|name| format!(" de {name}"))
                .unwrap_or_default();
            let body = format!("Se aprobó el pago{whose}{}", payment_detail(p));
            NotificationTemplate::new(K::Payment, "Pago aprobado", body)
                .link(DeepLink::new("Pagos").param("id_pago", p.payment_id))
        }
        DomainEvent::PaymentRejected(p) => {
            let mut body = format!(
                "Se rechazó el pago de {}{}",
                p.student_name.as_deref().unwrap_or(SOME_STUDENT),
                payment_detail(p)
            );
            if let Some(reason) = &p.reason {
                body.push_str(&format!(". Motivo: {reason}"));
            }
            NotificationTemplate::new(K::Payment, "Pago rechazado", body)
                .link(DeepLink::new("Pagos").param("id_pago", p.payment_id))
        }
        DomainEvent::EnrollmentRequested(p) => {
            let who = capitalize(p.student_name.as_deref().unwrap_or(SOME_STUDENT));
            let body = format!(
                "{who} solicitó matrícula en {}",
                course_or(&p.course_name, "un curso")
            );
            let link = match p.enrollment_id {
                Some(id) => DeepLink::new("RevisarMatricula").param("id_matricula", Some(id)),
                None => DeepLink::new("Matriculas"),
            };
            NotificationTemplate::new(K::Enrollment, "Nueva solicitud de matrícula", body).link(link)
        }
        DomainEvent::Announcement(p) => announcement(p),
        DomainEvent::NewAssignment(_)
        | DomainEvent::AssignmentGraded(_)
        | DomainEvent::SubmissionReceived(_)
        | DomainEvent::ModulePublished(_)
        | DomainEvent::GradePublished(_)
        | DomainEvent::EnrollmentApproved(_) => return None,
    };
    Some(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_listed_event_renders_for_any_payload() {
        let payloads = [
            json!({}),
            json!(null),
            json!("texto"),
            json!({ "curso_nombre": 5, "monto": null, "titulo": "" }),
        ];
        for role in Role::ALL {
            let catalog = RoleCatalog::new(role);
            for name in EventName::ALL {
                for payload in &payloads {
                    let rendered = catalog.render_raw(name.as_str(), payload);
                    assert_eq!(
                        rendered.is_some(),
                        catalog.handles(name),
                        "{role} / {name} / {payload}"
                    );
                    if let Some(template) = rendered {
                        assert!(!template.title.is_empty());
                        assert!(!template.body.is_empty());
                    }
                }
            }
        }
    }

    #[test]
    fn new_assignment_without_course_name_uses_generic_phrase() {
        let template = RoleCatalog::new(Role::Student)
            .render_raw("nueva_tarea", &json!({ "titulo": "Ensayo final" }))
            .unwrap();
        assert_eq!(template.kind, NotificationKind::Assignment);
        assert_eq!(template.title, "Nueva tarea");
        assert_eq!(template.body, "Se publicó la tarea «Ensayo final» en uno de tus cursos");
        assert_eq!(template.deep_link, None);
    }

    #[test]
    fn new_assignment_links_to_the_assignment() {
        let template = RoleCatalog::new(Role::Student)
            .render_raw(
                "nueva_tarea",
                &json!({ "id_tarea": 9, "id_curso": 3, "curso_nombre": "Física" }),
            )
            .unwrap();
        assert_eq!(template.body, "Se publicó una nueva tarea en Física");
        let link = template.deep_link.unwrap();
        assert_eq!(link.screen, "TareaDetalle");
        assert_eq!(link.params.get("id_tarea").map(String::as_str), Some("9"));
        assert_eq!(link.params.get("id_curso").map(String::as_str), Some("3"));
    }

    #[test]
    fn rejected_payment_reads_per_role() {
        let payload = json!({ "id_pago": 77, "monto": 120, "estudiante_nombre": "Ana Torres" });

        let student = RoleCatalog::new(Role::Student)
            .render_raw("pago_rechazado", &payload)
            .unwrap();
        let admin = RoleCatalog::new(Role::Admin)
            .render_raw("pago_rechazado", &payload)
            .unwrap();

        assert_eq!(
            student.body,
            "Tu pago por S/ 120.00 fue rechazado. Revisa el comprobante y vuelve a enviarlo"
        );
        assert_eq!(admin.body, "Se rechazó el pago de Ana Torres por S/ 120.00");
        assert_eq!(student.deep_link.unwrap().screen, "MisPagos");
        assert_eq!(admin.deep_link.unwrap().screen, "Pagos");
        assert!(RoleCatalog::new(Role::Teacher)
            .render_raw("pago_rechazado", &payload)
            .is_none());
    }

    #[test]
    fn submission_without_student_name() {
        let template = RoleCatalog::new(Role::Teacher)
            .render_raw("entrega_recibida", &json!({ "id_tarea": 4 }))
            .unwrap();
        assert_eq!(template.body, "Un estudiante entregó una tarea en uno de tus cursos");
        assert_eq!(template.deep_link.unwrap().screen, "EntregasTarea");
    }

    #[test]
    fn grade_detail_formats_scores() {
        let template = RoleCatalog::new(Role::Student)
            .render_raw(
                "tarea_calificada",
                &json!({ "tarea_titulo": "Laboratorio 2", "nota": 17.5, "nota_maxima": 20 }),
            )
            .unwrap();
        assert_eq!(template.body, "Tu entrega de «Laboratorio 2» fue calificada: 17.5/20");
    }

    #[test]
    fn announcement_uses_payload_text() {
        let template = RoleCatalog::new(Role::Teacher)
            .render_raw("anuncio", &json!({ "titulo": "Feriado", "mensaje": "No hay clases el lunes" }))
            .unwrap();
        assert_eq!(template.kind, NotificationKind::General);
        assert_eq!(template.title, "Feriado");
        assert_eq!(template.body, "No hay clases el lunes");
    }

    #[test]
    fn unknown_events_render_nothing() {
        for role in Role::ALL {
            assert!(RoleCatalog::new(role).render_raw("chat_mensaje", &json!({})).is_none());
        }
    }
}
