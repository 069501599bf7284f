use serde::Serialize;

use super::domain::{AdministrativeRequest, RequestKind, Role, UserProfile};

/// Static description of a request type offered to students.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestTypeSpec {
    pub kind: RequestKind,
    pub label: &'static str,
    pub description: &'static str,
    pub authority: Role,
    pub requires_justification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_amount: Option<&'static str>,
}

const CATALOG: [RequestTypeSpec; 13] = [
    RequestTypeSpec {
        kind: RequestKind::Releve,
        label: "Relevé de notes",
        description: "Document détaillant les notes obtenues aux examens",
        authority: Role::ChefDept,
        requires_justification: false,
        payment_amount: Some("10.000 FG"),
    },
    RequestTypeSpec {
        kind: RequestKind::Inscription,
        label: "Attestation d'inscription",
        description: "Document officiel confirmant votre statut d'étudiant inscrit",
        authority: Role::ChefDept,
        requires_justification: false,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Reussite,
        label: "Attestation de réussite",
        description: "Document certifiant la réussite à un niveau d'études",
        authority: Role::ChefDept,
        requires_justification: false,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Reclamation,
        label: "Réclamation de notes",
        description: "Demande de vérification de notes pour les filières DL et NTIC",
        authority: Role::DirecteurProg,
        requires_justification: true,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Stage,
        label: "Demande de Stage",
        description: "Demande pour effectuer un stage professionnel",
        authority: Role::Dae,
        requires_justification: true,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Suspension,
        label: "Suspension d'Études",
        description: "Demande d'interruption temporaire des études",
        authority: Role::DirecteurProg,
        requires_justification: true,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Absence,
        label: "Absence Prolongée",
        description: "Justification d'une absence de longue durée",
        authority: Role::ChefDept,
        requires_justification: true,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Diplome,
        label: "Diplôme / Certificat Final",
        description: "Document officiel attestant de l'obtention du diplôme",
        authority: Role::SecretaireDg,
        requires_justification: false,
        payment_amount: Some("50.000 FG"),
    },
    RequestTypeSpec {
        kind: RequestKind::Reinscription,
        label: "(Ré)Inscription Administrative",
        description: "Procédure annuelle d'enregistrement administratif",
        authority: Role::SecretaireDg,
        requires_justification: false,
        payment_amount: Some("20.000 FG"),
    },
    RequestTypeSpec {
        kind: RequestKind::Conge,
        label: "Congé Académique",
        description: "Suspension officielle des études pour une période déterminée",
        authority: Role::DirecteurProg,
        requires_justification: true,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Changement,
        label: "Changement de Filière",
        description: "Demande de transfert vers une autre spécialité d'études",
        authority: Role::DirecteurProg,
        requires_justification: true,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Recommandation,
        label: "Lettre de Recommandation",
        description: "Attestation des qualités académiques par un responsable",
        authority: Role::ChefDept,
        requires_justification: true,
        payment_amount: None,
    },
    RequestTypeSpec {
        kind: RequestKind::Convention,
        label: "Convention de Stage",
        description: "Accord officiel entre l'université et l'entreprise d'accueil",
        authority: Role::Dae,
        requires_justification: true,
        payment_amount: None,
    },
];

pub fn request_types() -> &'static [RequestTypeSpec] {
    &CATALOG
}

/// Catalogue entries are declared in `RequestKind` order.
pub fn spec_for(kind: RequestKind) -> &'static RequestTypeSpec {
    &CATALOG[kind as usize]
}

pub fn authority_for(kind: RequestKind) -> Role {
    spec_for(kind).authority
}

/// Request kinds routed to the given authority role.
pub fn kinds_handled_by(role: Role) -> Vec<RequestKind> {
    CATALOG
        .iter()
        .filter(|spec| spec.authority == role)
        .map(|spec| spec.kind)
        .collect()
}

/// Whether `actor` is the processing authority for `request`.
pub fn handles(actor: &UserProfile, request: &AdministrativeRequest) -> bool {
    let authority = authority_for(request.kind);
    if actor.role != authority {
        return false;
    }
    if authority.is_department_scoped() {
        return actor.department.is_some() && actor.department == request.department;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_maps_to_a_processing_authority() {
        for spec in request_types() {
            assert!(
                matches!(
                    spec.authority,
                    Role::ChefDept | Role::DirecteurProg | Role::Dae | Role::SecretaireDg
                ),
                "{:?} routed to {}",
                spec.kind,
                spec.authority
            );
            assert_eq!(spec_for(spec.kind).kind, spec.kind);
        }
    }

    #[test]
    fn transcripts_go_to_the_department_head() {
        assert_eq!(authority_for(RequestKind::Releve), Role::ChefDept);
        assert_eq!(authority_for(RequestKind::Convention), Role::Dae);
        assert_eq!(authority_for(RequestKind::Diplome), Role::SecretaireDg);
        assert_eq!(authority_for(RequestKind::Conge), Role::DirecteurProg);
    }

    #[test]
    fn dg_handles_no_request_kind_directly() {
        assert!(kinds_handled_by(Role::Dg).is_empty());
        assert_eq!(kinds_handled_by(Role::Dae).len(), 2);
    }
}
